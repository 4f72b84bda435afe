//! Action executor
//!
//! Single entrypoint for the side-effecting step bodies. Every failure —
//! missing collection, missing record, collaborator error — is caught and
//! surfaced as `{success: false, error}`; the engine decides whether that
//! fails the execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use tradewind_core::coerce::to_display_string;
use tradewind_core::collaborators::{HttpClient, Logger, MessageHandler};
use tradewind_core::condition::ValueSource;
use tradewind_core::path::set_path;
use tradewind_storage::Storage;

use crate::types::ActionDef;

/// Outcome of one action.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ActionResult {
    fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Executes action definitions against the store and the external sinks.
pub struct ActionExecutor {
    storage: Arc<dyn Storage>,
    messages: Arc<dyn MessageHandler>,
    http: Arc<dyn HttpClient>,
    logger: Arc<dyn Logger>,
}

impl ActionExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        messages: Arc<dyn MessageHandler>,
        http: Arc<dyn HttpClient>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            storage,
            messages,
            http,
            logger,
        }
    }

    /// Execute one action, resolving its inputs against `context` and
    /// writing results back into it where the action asks for that.
    pub async fn execute(&self, action: &ActionDef, context: &mut Value) -> ActionResult {
        match action {
            ActionDef::SendMessage {
                channel,
                recipient,
                message,
                template,
            } => {
                let recipient = to_display_string(&recipient.resolve(context));
                let message = to_display_string(&message.resolve(context));
                match self
                    .messages
                    .send(channel, &recipient, &message, template.as_deref())
                    .await
                {
                    Ok(()) => ActionResult::ok(None),
                    Err(error) => ActionResult::fail(error.to_string()),
                }
            }

            ActionDef::CreateEntity {
                collection,
                fields,
                save_result_to,
            } => {
                if !self.storage.has_collection(collection).await {
                    return ActionResult::fail(format!(
                        "Collection {collection} is not registered"
                    ));
                }
                let record = resolve_fields(fields, context);
                let repository = match self.storage.repository(collection).await {
                    Ok(repository) => repository,
                    Err(error) => return ActionResult::fail(error.to_string()),
                };
                match repository.create(record).await {
                    Ok(created) => {
                        if let Some(path) = save_result_to {
                            set_path(context, path, created.clone());
                        }
                        ActionResult::ok(Some(created))
                    }
                    Err(error) => ActionResult::fail(error.to_string()),
                }
            }

            ActionDef::UpdateEntity {
                collection,
                entity_id,
                fields,
                save_result_to,
            } => {
                if !self.storage.has_collection(collection).await {
                    return ActionResult::fail(format!(
                        "Collection {collection} is not registered"
                    ));
                }
                let id = to_display_string(&entity_id.resolve(context));
                let repository = match self.storage.repository(collection).await {
                    Ok(repository) => repository,
                    Err(error) => return ActionResult::fail(error.to_string()),
                };
                let existing = match repository.find_by_id(&id).await {
                    Ok(Some(existing)) => existing,
                    Ok(None) => {
                        return ActionResult::fail(format!(
                            "Record {id} not found in {collection}"
                        ))
                    }
                    Err(error) => return ActionResult::fail(error.to_string()),
                };
                // Resolved fields merge over the existing record
                let mut merged = existing;
                for (field, source) in fields {
                    set_path(&mut merged, field, source.resolve(context));
                }
                match repository.update(&id, merged).await {
                    Ok(Some(updated)) => {
                        if let Some(path) = save_result_to {
                            set_path(context, path, updated.clone());
                        }
                        ActionResult::ok(Some(updated))
                    }
                    Ok(None) => {
                        ActionResult::fail(format!("Record {id} not found in {collection}"))
                    }
                    Err(error) => ActionResult::fail(error.to_string()),
                }
            }

            ActionDef::DeleteEntity {
                collection,
                entity_id,
            } => {
                if !self.storage.has_collection(collection).await {
                    return ActionResult::fail(format!(
                        "Collection {collection} is not registered"
                    ));
                }
                let id = to_display_string(&entity_id.resolve(context));
                let repository = match self.storage.repository(collection).await {
                    Ok(repository) => repository,
                    Err(error) => return ActionResult::fail(error.to_string()),
                };
                match repository.delete(&id).await {
                    Ok(true) => ActionResult::ok(Some(json!({"deleted": true}))),
                    Ok(false) => {
                        ActionResult::fail(format!("Record {id} not found in {collection}"))
                    }
                    Err(error) => ActionResult::fail(error.to_string()),
                }
            }

            ActionDef::SetContext { values } => {
                for (path, source) in values {
                    // Later entries see earlier writes
                    let resolved = source.resolve(context);
                    set_path(context, path, resolved);
                }
                ActionResult::ok(None)
            }

            ActionDef::HttpCall {
                method,
                url,
                headers,
                body,
                save_result_to,
            } => {
                let url = to_display_string(&url.resolve(context));
                let headers: HashMap<String, String> = headers
                    .iter()
                    .map(|(name, source)| {
                        (name.clone(), to_display_string(&source.resolve(context)))
                    })
                    .collect();
                let body = body.as_ref().map(|source| source.resolve(context));
                match self.http.request(method, &url, &headers, body.as_ref()).await {
                    Ok(response) => {
                        debug!(status = response.status, %url, "http call completed");
                        let data = json!({"status": response.status, "body": response.body});
                        if let Some(path) = save_result_to {
                            set_path(context, path, data.clone());
                        }
                        ActionResult::ok(Some(data))
                    }
                    Err(error) => ActionResult::fail(error.to_string()),
                }
            }

            ActionDef::Log { level, message, data } => {
                let message = to_display_string(&message.resolve(context));
                let data = data.as_ref().map(|source| source.resolve(context));
                self.logger.log(*level, &message, data.as_ref());
                ActionResult::ok(None)
            }
        }
    }
}

fn resolve_fields(
    fields: &indexmap::IndexMap<String, ValueSource>,
    context: &Value,
) -> Value {
    let mut record = Value::Object(Map::new());
    for (field, source) in fields {
        set_path(&mut record, field, source.resolve(context));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradewind_core::collaborators::{
        CannedHttpClient, HttpResponse, LogLevel, RecordingLogger, RecordingMessageHandler,
    };
    use tradewind_storage::MemoryStorage;

    struct Fixture {
        storage: MemoryStorage,
        messages: Arc<RecordingMessageHandler>,
        logger: Arc<RecordingLogger>,
        executor: ActionExecutor,
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::new();
        let messages = Arc::new(RecordingMessageHandler::new());
        let logger = Arc::new(RecordingLogger::new());
        let http = Arc::new(CannedHttpClient::new(HttpResponse {
            status: 200,
            body: json!({"ok": true}),
        }));
        let executor = ActionExecutor::new(
            Arc::new(storage.clone()),
            messages.clone(),
            http,
            logger.clone(),
        );
        Fixture {
            storage,
            messages,
            logger,
            executor,
        }
    }

    #[tokio::test]
    async fn test_send_message_resolves_sources() {
        let f = fixture();
        let action = ActionDef::SendMessage {
            channel: "email".to_string(),
            recipient: ValueSource::field("customer.email"),
            message: ValueSource::constant(json!("hello")),
            template: None,
        };
        let mut context = json!({"customer": {"email": "ada@example.com"}});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        assert_eq!(f.messages.sent()[0].recipient, "ada@example.com");
    }

    #[tokio::test]
    async fn test_create_entity_requires_registered_collection() {
        let f = fixture();
        let action = ActionDef::CreateEntity {
            collection: "orders".to_string(),
            fields: indexmap::IndexMap::new(),
            save_result_to: None,
        };
        let mut context = json!({});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Collection orders is not registered")
        );
    }

    #[tokio::test]
    async fn test_create_entity_saves_result_to_context() {
        let f = fixture();
        f.storage.register_collection("orders", None).await;
        let mut fields = indexmap::IndexMap::new();
        fields.insert("amount".to_string(), ValueSource::field("total"));
        let action = ActionDef::CreateEntity {
            collection: "orders".to_string(),
            fields,
            save_result_to: Some("created.order".to_string()),
        };
        let mut context = json!({"total": 42});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        assert_eq!(context["created"]["order"]["amount"], json!(42));
        assert!(context["created"]["order"]["id"].is_string());
    }

    #[tokio::test]
    async fn test_update_entity_merges_fields() {
        let f = fixture();
        f.storage.register_collection("orders", None).await;
        let repository = f.storage.repository("orders").await.unwrap();
        repository
            .create(json!({"id": "o1", "status": "open", "amount": 10}))
            .await
            .unwrap();
        let mut fields = indexmap::IndexMap::new();
        fields.insert("status".to_string(), ValueSource::constant(json!("closed")));
        let action = ActionDef::UpdateEntity {
            collection: "orders".to_string(),
            entity_id: ValueSource::constant(json!("o1")),
            fields,
            save_result_to: None,
        };
        let mut context = json!({});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        let updated = repository.find_by_id("o1").await.unwrap().unwrap();
        assert_eq!(updated["status"], json!("closed"));
        assert_eq!(updated["amount"], json!(10));
    }

    #[tokio::test]
    async fn test_update_missing_record_fails_with_reason() {
        let f = fixture();
        f.storage.register_collection("orders", None).await;
        let action = ActionDef::UpdateEntity {
            collection: "orders".to_string(),
            entity_id: ValueSource::constant(json!("ghost")),
            fields: indexmap::IndexMap::new(),
            save_result_to: None,
        };
        let result = f.executor.execute(&action, &mut json!({})).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Record ghost not found in orders")
        );
    }

    #[tokio::test]
    async fn test_set_context_creates_nested_structures() {
        let f = fixture();
        let mut values = indexmap::IndexMap::new();
        values.insert("user.tags[0]".to_string(), ValueSource::constant(json!("vip")));
        values.insert("copy".to_string(), ValueSource::field("user.tags[0]"));
        let action = ActionDef::SetContext { values };
        let mut context = json!({});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        assert_eq!(context, json!({"user": {"tags": ["vip"]}, "copy": "vip"}));
    }

    #[tokio::test]
    async fn test_http_call_saves_response() {
        let f = fixture();
        let action = ActionDef::HttpCall {
            method: "GET".to_string(),
            url: ValueSource::constant(json!("https://api.example.com/ping")),
            headers: indexmap::IndexMap::new(),
            body: None,
            save_result_to: Some("response".to_string()),
        };
        let mut context = json!({});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        assert_eq!(context["response"]["status"], json!(200));
        assert_eq!(context["response"]["body"]["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_log_defaults_to_info() {
        let f = fixture();
        let action = ActionDef::Log {
            level: LogLevel::default(),
            message: ValueSource::constant(json!("checkpoint")),
            data: Some(ValueSource::field("value")),
        };
        let mut context = json!({"value": 7});
        let result = f.executor.execute(&action, &mut context).await;
        assert!(result.success);
        let entries = f.logger.entries();
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "checkpoint");
        assert_eq!(entries[0].data, Some(json!(7)));
    }
}
