use std::collections::HashMap;

use serde_json::Value;

use super::{OperatorId, RouteDecision, Router, RoutingError};

/// Where a stage's output goes next.
#[derive(Debug, Clone)]
pub enum RouteRule {
    /// Unconditional edge.
    Next(OperatorId),

    /// Conditional edge: consult a boolean field of the stage's output and
    /// pick a successor. The field must be present and a bool, otherwise the
    /// request fails with a routing error.
    Branch {
        field: String,
        if_true: OperatorId,
        if_false: OperatorId,
    },

    /// This stage's output is the pipeline result.
    End,
}

/// Explicit adjacency routing, keyed by stage id and optionally by output
/// content.
///
/// The table must be closed: every id reachable from the start has a rule,
/// and the default hop budget (twice the rule count, at least one) bounds
/// cyclic configurations so a route that never reaches [`RouteRule::End`]
/// fails explicitly instead of looping.
#[derive(Debug, Clone)]
pub struct GraphRouter {
    start: OperatorId,
    rules: HashMap<OperatorId, RouteRule>,
    hop_budget: usize,
}

impl GraphRouter {
    pub fn new(start: OperatorId, rules: HashMap<OperatorId, RouteRule>) -> Self {
        let hop_budget = rules.len().max(1) * 2;
        Self {
            start,
            rules,
            hop_budget,
        }
    }

    /// Overrides the cycle-detection budget.
    pub fn with_hop_budget(mut self, hop_budget: usize) -> Self {
        self.hop_budget = hop_budget.max(1);
        self
    }

    fn rule_targets(rule: &RouteRule) -> Vec<OperatorId> {
        match rule {
            RouteRule::Next(id) => vec![*id],
            RouteRule::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            RouteRule::End => vec![],
        }
    }
}

impl Router for GraphRouter {
    fn start(&self) -> OperatorId {
        self.start
    }

    fn next(&self, current: OperatorId, output: &Value) -> Result<RouteDecision, RoutingError> {
        let rule = self
            .rules
            .get(&current)
            .ok_or(RoutingError::UnknownOperator(current))?;

        match rule {
            RouteRule::Next(id) => Ok(RouteDecision::Next(*id)),
            RouteRule::Branch {
                field,
                if_true,
                if_false,
            } => {
                let flag = output.get(field).and_then(Value::as_bool).ok_or_else(|| {
                    RoutingError::MissingBranchField {
                        stage: current,
                        field: field.clone(),
                    }
                })?;
                Ok(RouteDecision::Next(if flag { *if_true } else { *if_false }))
            }
            RouteRule::End => Ok(RouteDecision::Terminate),
        }
    }

    fn hop_budget(&self) -> usize {
        self.hop_budget
    }

    fn validate(&self, operator_count: usize) -> Result<(), RoutingError> {
        if !self.rules.contains_key(&self.start) {
            return Err(RoutingError::NotClosed(format!(
                "start id {} has no rule",
                self.start
            )));
        }
        if self.start >= operator_count {
            return Err(RoutingError::UnknownOperator(self.start));
        }
        for (id, rule) in &self.rules {
            if *id >= operator_count {
                return Err(RoutingError::UnknownOperator(*id));
            }
            for target in Self::rule_targets(rule) {
                if target >= operator_count {
                    return Err(RoutingError::UnknownOperator(target));
                }
                if !self.rules.contains_key(&target) {
                    return Err(RoutingError::NotClosed(format!(
                        "stage {id} routes to {target}, which has no rule"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branching_router() -> GraphRouter {
        // 0 branches on `skip`: true goes straight to 2, false visits 1
        let mut rules = HashMap::new();
        rules.insert(
            0,
            RouteRule::Branch {
                field: "skip".to_string(),
                if_true: 2,
                if_false: 1,
            },
        );
        rules.insert(1, RouteRule::Next(2));
        rules.insert(2, RouteRule::End);
        GraphRouter::new(0, rules)
    }

    #[test]
    fn branch_consults_the_output() {
        let router = branching_router();
        assert_eq!(
            router.next(0, &json!({"skip": true})).unwrap(),
            RouteDecision::Next(2)
        );
        assert_eq!(
            router.next(0, &json!({"skip": false})).unwrap(),
            RouteDecision::Next(1)
        );
    }

    #[test]
    fn missing_branch_field_is_a_routing_error() {
        let router = branching_router();
        let err = router.next(0, &json!({})).unwrap_err();
        assert!(matches!(err, RoutingError::MissingBranchField { .. }));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let router = branching_router();
        assert_eq!(
            router.next(9, &json!({})).unwrap_err(),
            RoutingError::UnknownOperator(9)
        );
    }

    #[test]
    fn validate_requires_closed_table() {
        let mut rules = HashMap::new();
        rules.insert(0, RouteRule::Next(1));
        // no rule for 1
        let router = GraphRouter::new(0, rules);
        assert!(matches!(
            router.validate(2).unwrap_err(),
            RoutingError::NotClosed(_)
        ));
    }

    #[test]
    fn validate_rejects_unregistered_targets() {
        let mut rules = HashMap::new();
        rules.insert(0, RouteRule::Next(1));
        rules.insert(1, RouteRule::End);
        let router = GraphRouter::new(0, rules);
        assert!(router.validate(2).is_ok());
        assert_eq!(
            router.validate(1).unwrap_err(),
            RoutingError::UnknownOperator(1)
        );
    }
}
