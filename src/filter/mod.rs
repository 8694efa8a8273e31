use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Context a predicate is evaluated against: the admitted Pod (namespace
/// already defaulted from the admission request) and the container under
/// evaluation. Serialized to a self-describing tree so the query language
/// never sees typed objects.
#[derive(Serialize)]
pub struct FilterContext<'a> {
    pub obj: &'a Pod,
    pub container: serde_json::Value,
}

/// Evaluate JMESPath predicates in order; the first one returning boolean
/// `true` wins and means "leave this container alone".
///
/// Non-boolean results are logged and treated as no-match, evaluation
/// continues. A predicate that fails to compile or evaluate fails closed:
/// `false` is returned immediately and the container will be processed.
pub fn matches(ctx: &FilterContext<'_>, filters: &[String]) -> bool {
    if filters.is_empty() {
        return false;
    }
    let data: jmespath::Rcvar = match jmespath::Variable::from_serializable(ctx) {
        Ok(data) => Rc::new(data),
        Err(e) => {
            error!(error = %e, "Unable to serialize filter context");
            return false;
        }
    };
    for filter in filters {
        let expression = match jmespath::compile(filter) {
            Ok(expression) => expression,
            Err(e) => {
                error!(filter, error = %e, "Filter does not compile");
                return false;
            }
        };
        match expression.search(data.clone()) {
            Ok(result) => match result.as_boolean() {
                Some(true) => {
                    debug!(filter, "Filter matched");
                    return true;
                }
                Some(false) => {}
                None => {
                    warn!(filter, result = %result, "Filter returned a non-boolean result, ignoring");
                }
            },
            Err(e) => {
                error!(filter, error = %e, "Filter evaluation failed");
                return false;
            }
        }
    }
    false
}
