// Persistence: Postgres repositories and the Redis candle cache
pub mod candle_cache;
pub mod postgres;

pub use candle_cache::RedisCandleStore;
pub use postgres::{
    connect, ExecutionLogRepository, OrderRepository, PgExecutionLogSink, PgPositionProvider,
    PipelineRepository, PositionRepository,
};
