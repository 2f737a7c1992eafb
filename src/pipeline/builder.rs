use crate::models::PipelineStepConfig;
use crate::params::{self, ParamError};
use crate::pipeline::{StepDeps, StepRegistry, TradingStep};

/// Validation failures for one configured step.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildError {
    pub step_key: String,
    pub errors: Vec<ParamError>,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step '{}': ", self.step_key)?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Resolve persisted step configurations into runnable steps.
///
/// Configs are processed in ascending `order`; ties keep their original
/// list position (the sort is stable). Disabled configs and configs whose
/// key is no longer registered are skipped. Validation errors accumulate
/// across the whole list and the build is all-or-nothing: any error means
/// no steps are returned.
pub fn build_steps(
    registry: &StepRegistry,
    deps: &StepDeps,
    configs: &[PipelineStepConfig],
) -> Result<Vec<Box<dyn TradingStep>>, Vec<BuildError>> {
    let mut ordered: Vec<&PipelineStepConfig> = configs.iter().collect();
    ordered.sort_by_key(|config| config.order);

    let mut resolved = Vec::new();
    let mut errors = Vec::new();

    for config in ordered {
        if !config.is_enabled {
            continue;
        }

        let Some(def) = registry.try_find(&config.step_key) else {
            // Configuration may reference a step kind that was since removed.
            tracing::warn!(step_key = %config.step_key, "skipping unknown step kind");
            continue;
        };

        match params::validate(&def.parameters, &config.parameters) {
            Ok(validated) => resolved.push((def, validated)),
            Err(param_errors) => errors.push(BuildError {
                step_key: config.step_key.clone(),
                errors: param_errors,
            }),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(resolved
        .into_iter()
        .map(|(def, validated)| def.build(validated, deps))
        .collect())
}
