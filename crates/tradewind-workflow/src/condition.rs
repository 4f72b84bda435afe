//! Workflow-dialect condition evaluation
//!
//! Same tree shape as the pure evaluator in `tradewind-core`, with the
//! `exists` leaf wired to the store: it reads every record of the named
//! collection and asks whether any row satisfies the single-field filter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use tradewind_core::condition::{compare, Condition};
use tradewind_storage::Storage;

/// Evaluates condition trees against a record, with repository access for
/// `exists`.
pub struct ConditionEvaluator {
    storage: Arc<dyn Storage>,
}

impl ConditionEvaluator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Evaluate a condition. An `exists` over an unregistered collection
    /// sees no rows and is false.
    pub fn evaluate<'a>(
        &'a self,
        condition: &'a Condition,
        record: &'a Value,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match condition {
                Condition::Compare { left, op, right } => {
                    compare(&left.resolve(record), *op, &right.resolve(record))
                }
                Condition::Exists { collection, filter } => {
                    let Ok(repository) = self.storage.repository(collection).await else {
                        return false;
                    };
                    match repository.find_all(None).await {
                        Ok(rows) => rows.iter().any(|row| filter.matches(row)),
                        Err(_) => false,
                    }
                }
                Condition::And { conditions } => {
                    for nested in conditions {
                        if !self.evaluate(nested, record).await {
                            return false;
                        }
                    }
                    true
                }
                Condition::Or { conditions } => {
                    for nested in conditions {
                        if self.evaluate(nested, record).await {
                            return true;
                        }
                    }
                    false
                }
                Condition::Not { condition } => !self.evaluate(condition, record).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradewind_core::condition::{CompareOp, ExistsFilter, ValueSource};
    use tradewind_storage::MemoryStorage;

    fn evaluator(storage: MemoryStorage) -> ConditionEvaluator {
        ConditionEvaluator::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_compare_against_context() {
        let evaluator = evaluator(MemoryStorage::new());
        let condition = Condition::Compare {
            left: ValueSource::field("value"),
            op: CompareOp::Gt,
            right: ValueSource::constant(json!(10)),
        };
        assert!(evaluator.evaluate(&condition, &json!({"value": 15})).await);
        assert!(!evaluator.evaluate(&condition, &json!({"value": 5})).await);
    }

    #[tokio::test]
    async fn test_exists_queries_collection() {
        let storage = MemoryStorage::new();
        let repository = storage.ensure_collection("orders").await;
        repository
            .create(json!({"id": "o1", "status": "open"}))
            .await
            .unwrap();
        let evaluator = evaluator(storage);
        let exists = |status: &str| Condition::Exists {
            collection: "orders".to_string(),
            filter: ExistsFilter {
                field: "status".to_string(),
                op: CompareOp::Eq,
                value: json!(status),
            },
        };
        assert!(evaluator.evaluate(&exists("open"), &json!({})).await);
        assert!(!evaluator.evaluate(&exists("closed"), &json!({})).await);
    }

    #[tokio::test]
    async fn test_exists_on_missing_collection_is_false() {
        let evaluator = evaluator(MemoryStorage::new());
        let condition = Condition::Exists {
            collection: "ghosts".to_string(),
            filter: ExistsFilter {
                field: "x".to_string(),
                op: CompareOp::Eq,
                value: json!(1),
            },
        };
        assert!(!evaluator.evaluate(&condition, &json!({})).await);
    }

    #[tokio::test]
    async fn test_combinators_with_exists() {
        let storage = MemoryStorage::new();
        storage.ensure_collection("orders").await;
        let evaluator = evaluator(storage);
        let condition = Condition::Or {
            conditions: vec![
                Condition::Exists {
                    collection: "orders".to_string(),
                    filter: ExistsFilter {
                        field: "x".to_string(),
                        op: CompareOp::Eq,
                        value: json!(1),
                    },
                },
                Condition::Not {
                    condition: Box::new(Condition::Compare {
                        left: ValueSource::field("flag"),
                        op: CompareOp::Eq,
                        right: ValueSource::constant(json!(true)),
                    }),
                },
            ],
        };
        assert!(evaluator.evaluate(&condition, &json!({"flag": false})).await);
        assert!(!evaluator.evaluate(&condition, &json!({"flag": true})).await);
    }
}
