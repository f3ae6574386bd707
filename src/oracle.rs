use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::config::PackingConfig;
use crate::error::Result;
use crate::svg::Element;
use crate::types::PackingResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NestParams {
    pub tolerance: f64,
    /// Minimum distance kept between placed parts.
    pub spacing: f64,
    /// Return what fits instead of failing when some shapes do not.
    pub partial: bool,
    /// Number of evenly spaced orientations tried per part.
    pub rotations: u32,
}

impl NestParams {
    pub fn from_config(config: &PackingConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            spacing: config.spacing,
            partial: config.partial_solutions,
            rotations: config.rotations,
        }
    }
}

impl Default for NestParams {
    fn default() -> Self {
        Self::from_config(&PackingConfig::default())
    }
}

pub trait NestingOracle: Send + Sync {
    /// Places the shapes of `shapes` onto the `stock` sheets. Returned sheet
    /// ids index into `stock`.
    fn pack(&self, stock: &[Element], shapes: &Element, params: &NestParams) -> Result<PackingResult>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum NestOutcome {
    Placed(PackingResult),
    Failed { cause: String },
}

pub fn nest_isolated(
    oracle: &dyn NestingOracle,
    stock: &[Element],
    shapes: &Element,
    params: &NestParams,
) -> NestOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| oracle.pack(stock, shapes, params))) {
        Ok(Ok(result)) => NestOutcome::Placed(result),
        Ok(Err(e)) => NestOutcome::Failed {
            cause: e.to_string(),
        },
        Err(payload) => NestOutcome::Failed {
            cause: format!("nesting oracle panicked: {}", panic_message(payload.as_ref())),
        },
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Fixed(fn() -> Result<PackingResult>);

    impl NestingOracle for Fixed {
        fn pack(&self, _: &[Element], _: &Element, _: &NestParams) -> Result<PackingResult> {
            (self.0)()
        }
    }

    fn run(oracle: &Fixed) -> NestOutcome {
        nest_isolated(oracle, &[], &Element::new("svg"), &NestParams::default())
    }

    #[test]
    fn test_success_passes_through() {
        let oracle = Fixed(|| {
            Ok(PackingResult {
                sheets: vec![],
                placed: 0,
                unplaced: 2,
            })
        });
        match run(&oracle) {
            NestOutcome::Placed(r) => assert_eq!(r.unplaced, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_becomes_failed() {
        let oracle = Fixed(|| Err(Error::Nesting("bad path data".to_string())));
        assert_eq!(
            run(&oracle),
            NestOutcome::Failed {
                cause: "Nesting failed: bad path data".to_string()
            }
        );
    }

    #[test]
    fn test_panic_becomes_failed() {
        let oracle = Fixed(|| panic!("boom"));
        match run(&oracle) {
            NestOutcome::Failed { cause } => assert!(cause.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_params_follow_config() {
        let params = NestParams::default();
        assert_eq!(params.tolerance, 5.0);
        assert_eq!(params.spacing, 10.0);
        assert!(params.partial);
        assert_eq!(params.rotations, 2);
    }
}
