use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

use crate::models::{Candle, MarketType, Timeframe};
use crate::ports::CandleStore;
use crate::{Result, ServiceError};

/// Stored form of one candle in Redis
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCandle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    timestamp: DateTime<Utc>,
}

/// Redis-backed candle cache implementing the [`CandleStore`] port.
///
/// Uses sorted sets keyed per symbol/market/timeframe with the candle
/// timestamp as score, so bounded time-range queries stay cheap. The
/// out-of-scope sync job writes through [`RedisCandleStore::save_candles`].
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

impl RedisCandleStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // 5 second cap on the connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| ServiceError::api("Redis connection timeout after 5 seconds"))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(symbol: &str, market: MarketType, timeframe: Timeframe) -> String {
        format!("candles:{}:{}:{}", symbol, market, timeframe)
    }

    /// Save candles to the cache, keyed by timestamp.
    pub async fn save_candles(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<()> {
        let key = Self::key(symbol, market, timeframe);
        let mut conn = self.conn.clone();

        for candle in candles {
            let stored = StoredCandle {
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
                timestamp: candle.timestamp,
            };

            let value = serde_json::to_string(&stored)?;
            let score = candle.timestamp.timestamp() as f64;

            conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Saved {} candles under {}", candles.len(), key);

        Ok(())
    }

    /// Remove candles older than `keep_hours` to bound the cache.
    pub async fn cleanup_old(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
        keep_hours: u64,
    ) -> Result<usize> {
        let key = Self::key(symbol, market, timeframe);
        let mut conn = self.conn.clone();

        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);
        let max_score = cutoff.timestamp() as f64;

        let removed: usize = conn.zrembyscore(&key, "-inf", max_score).await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old candles under {}", removed, key);
        }

        Ok(removed)
    }

    /// Number of cached candles for a series.
    pub async fn count(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
    ) -> Result<usize> {
        let key = Self::key(symbol, market, timeframe);
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(&key).await?;
        Ok(count)
    }
}

#[async_trait]
impl CandleStore for RedisCandleStore {
    async fn query_candles(
        &self,
        symbol: &str,
        market: MarketType,
        timeframe: Timeframe,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let key = Self::key(symbol, market, timeframe);
        let mut conn = self.conn.clone();

        let min = from
            .map(|t| t.timestamp().to_string())
            .unwrap_or_else(|| "-inf".to_string());
        let max = to
            .map(|t| t.timestamp().to_string())
            .unwrap_or_else(|| "+inf".to_string());

        // Reverse range: newest first, as the port contract requires.
        let results: Vec<String> = match limit {
            Some(limit) => {
                conn.zrevrangebyscore_limit(&key, &max, &min, 0, limit as isize)
                    .await?
            }
            None => conn.zrevrangebyscore(&key, &max, &min).await?,
        };

        let mut candles = Vec::with_capacity(results.len());

        for json_str in results {
            let stored: StoredCandle = serde_json::from_str(&json_str)?;

            candles.push(Candle {
                symbol: symbol.to_string(),
                market,
                timestamp: stored.timestamp,
                open: stored.open,
                high: stored.high,
                low: stored.low,
                close: stored.close,
                volume: stored.volume,
            });
        }

        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_candle(hours_ago: i64, close: f64) -> Candle {
        Candle {
            symbol: "TEST".to_string(),
            market: MarketType::Spot,
            timestamp: Utc::now() - chrono::Duration::hours(hours_ago),
            open: close,
            high: close,
            low: close,
            close,
            volume: close * 10.0,
        }
    }

    async fn test_store() -> RedisCandleStore {
        RedisCandleStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        // Non-routable address
        let result = RedisCandleStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_and_query_newest_first() {
        let store = test_store().await;
        let _ = store
            .cleanup_old("TEST", MarketType::Spot, Timeframe::H1, 0)
            .await;

        let candles = vec![test_candle(3, 100.0), test_candle(2, 101.0), test_candle(1, 102.0)];
        store
            .save_candles("TEST", MarketType::Spot, Timeframe::H1, &candles)
            .await
            .unwrap();

        let loaded = store
            .recent_candles("TEST", MarketType::Spot, Timeframe::H1, 10)
            .await
            .unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].close, 102.0);
        assert_eq!(loaded[2].close, 100.0);

        let _ = store
            .cleanup_old("TEST", MarketType::Spot, Timeframe::H1, 0)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_limit_keeps_newest() {
        let store = test_store().await;
        let _ = store
            .cleanup_old("TEST_LIMIT", MarketType::Spot, Timeframe::H1, 0)
            .await;

        let candles = vec![test_candle(3, 100.0), test_candle(2, 101.0), test_candle(1, 102.0)];
        store
            .save_candles("TEST_LIMIT", MarketType::Spot, Timeframe::H1, &candles)
            .await
            .unwrap();

        let loaded = store
            .recent_candles("TEST_LIMIT", MarketType::Spot, Timeframe::H1, 2)
            .await
            .unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].close, 102.0);
        assert_eq!(loaded[1].close, 101.0);

        let _ = store
            .cleanup_old("TEST_LIMIT", MarketType::Spot, Timeframe::H1, 0)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_cleanup_and_count() {
        let store = test_store().await;
        let _ = store
            .cleanup_old("TEST_CLEAN", MarketType::Spot, Timeframe::H1, 0)
            .await;

        let candles = vec![test_candle(72, 100.0), test_candle(1, 101.0)];
        store
            .save_candles("TEST_CLEAN", MarketType::Spot, Timeframe::H1, &candles)
            .await
            .unwrap();

        let removed = store
            .cleanup_old("TEST_CLEAN", MarketType::Spot, Timeframe::H1, 24)
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let count = store
            .count("TEST_CLEAN", MarketType::Spot, Timeframe::H1)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let _ = store
            .cleanup_old("TEST_CLEAN", MarketType::Spot, Timeframe::H1, 0)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_empty_series() {
        let store = test_store().await;

        let loaded = store
            .recent_candles("NONEXISTENT", MarketType::Spot, Timeframe::H1, 10)
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }
}
