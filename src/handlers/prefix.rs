use super::CustomResource;
use crate::{error::RuntimeError, event::from_list};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// `ResourceProperties` of the prefix list resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrefixProperties {
    /// Items to prefix
    #[serde(deserialize_with = "from_list")]
    pub items: Vec<String>,
    /// Prefix prepended to every item
    pub prefix: String,
}

/// Prepends a prefix to a list of strings, for templates that can't do it
/// with intrinsic functions.
#[derive(Debug, Default)]
pub struct PrefixHandler;

#[async_trait]
impl CustomResource for PrefixHandler {
    type Properties = PrefixProperties;

    async fn apply(&self, properties: PrefixProperties) -> Result<Value, RuntimeError> {
        let result: Vec<String> = properties
            .items
            .iter()
            .map(|item| format!("{}{item}", properties.prefix))
            .collect();
        Ok(json!({ "result": result }))
    }

    async fn remove(&self, _properties: PrefixProperties) -> Result<(), RuntimeError> {
        Ok(())
    }
}
