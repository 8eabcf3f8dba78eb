use serde_json::Value;

use super::{OperatorId, RouteDecision, Router, RoutingError};

/// Chain routing: stage ids are positions `0..end_route`, every output moves
/// to the next position, and reaching `end_route` terminates the pipeline.
#[derive(Debug, Clone)]
pub struct LinearRouter {
    end_route: OperatorId,
}

impl LinearRouter {
    /// `end_route` is one past the last stage, i.e. the operator count.
    pub fn new(end_route: OperatorId) -> Self {
        Self { end_route }
    }
}

impl Router for LinearRouter {
    fn start(&self) -> OperatorId {
        0
    }

    fn next(&self, current: OperatorId, _output: &Value) -> Result<RouteDecision, RoutingError> {
        if current >= self.end_route {
            return Err(RoutingError::UnknownOperator(current));
        }
        if current + 1 == self.end_route {
            Ok(RouteDecision::Terminate)
        } else {
            Ok(RouteDecision::Next(current + 1))
        }
    }

    // A chain visits each stage once.
    fn hop_budget(&self) -> usize {
        self.end_route
    }

    fn validate(&self, operator_count: usize) -> Result<(), RoutingError> {
        if self.end_route == 0 {
            return Err(RoutingError::NotClosed(
                "linear route has no stages".to_string(),
            ));
        }
        if self.end_route > operator_count {
            return Err(RoutingError::UnknownOperator(self.end_route - 1));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_the_chain_then_terminates() {
        let router = LinearRouter::new(2);
        assert_eq!(router.start(), 0);
        assert_eq!(
            router.next(0, &json!({})).unwrap(),
            RouteDecision::Next(1)
        );
        assert_eq!(router.next(1, &json!({})).unwrap(), RouteDecision::Terminate);
    }

    #[test]
    fn rejects_out_of_range_stage() {
        let router = LinearRouter::new(2);
        assert_eq!(
            router.next(5, &json!({})).unwrap_err(),
            RoutingError::UnknownOperator(5)
        );
    }

    #[test]
    fn validate_checks_operator_count() {
        assert!(LinearRouter::new(2).validate(2).is_ok());
        assert!(LinearRouter::new(3).validate(2).is_err());
        assert!(LinearRouter::new(0).validate(2).is_err());
    }
}
