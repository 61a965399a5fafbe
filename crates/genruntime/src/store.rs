use async_trait::async_trait;
use gencore::{Template, TemplateId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-only template contract. The engine only ever takes a snapshot;
/// template authoring and retention live with the external store.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, id: TemplateId) -> Option<Template>;
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<TemplateId, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, template: Template) -> TemplateId {
        let id = template.id;
        self.templates.write().await.insert(id, template);
        id
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, id: TemplateId) -> Option<Template> {
        self.templates.read().await.get(&id).cloned()
    }
}
