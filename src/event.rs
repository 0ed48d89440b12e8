use serde::{de::Error, Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// `RequestType` is the lifecycle step CloudFormation asks the handler to run
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum RequestType {
    /// The resource is being created
    Create,
    /// The resource properties changed
    Update,
    /// The resource is being removed
    Delete,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// `CustomResourceEvent` represents the raw event sent by CloudFormation
/// to a custom resource handler
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent<P = Value> {
    /// Lifecycle step to run
    pub request_type: RequestType,
    /// Pre-signed URL the response must be PUT to
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    /// Stack that owns the resource
    pub stack_id: String,
    /// Unique id of this request
    pub request_id: String,
    /// Resource name in the template
    pub logical_resource_id: String,
    /// Id returned by a previous response, absent on Create
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    /// Custom resource type, e.g. `Custom::Provision`
    #[serde(default)]
    pub resource_type: String,
    /// Handler specific properties
    pub resource_properties: P,
}

impl CustomResourceEvent<Value> {
    /// Decode the generic property map into the handler's typed properties.
    /// Delete events keep working even if the properties cannot be decoded,
    /// the caller decides what to do with the error.
    pub fn typed<P>(self) -> (CustomResourceEvent<()>, Result<P, serde_json::Error>)
    where
        P: for<'de> Deserialize<'de>,
    {
        let properties = serde_json::from_value(self.resource_properties);
        let event = CustomResourceEvent {
            request_type: self.request_type,
            response_url: self.response_url,
            stack_id: self.stack_id,
            request_id: self.request_id,
            logical_resource_id: self.logical_resource_id,
            physical_resource_id: self.physical_resource_id,
            resource_type: self.resource_type,
            resource_properties: (),
        };
        (event, properties)
    }
}

/// Copy of the event suitable for logging: database passwords are masked.
pub fn redacted(event: &Value) -> Value {
    let mut event = event.clone();
    if let Some(Value::String(password)) = event
        .get_mut("ResourceProperties")
        .and_then(|p| p.get_mut("DbPassword"))
    {
        *password = "*".repeat(password.len());
    }
    event
}

/// CloudFormation sends every scalar property as a string, so flags
/// arrive as `"true"`/`"false"`. JSON booleans are accepted too.
pub fn from_flag<'d, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'d>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => Ok(s.trim().eq_ignore_ascii_case("true")),
    }
}

/// A list property, sent either as a JSON list or as a comma separated string.
pub fn from_list<'d, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'d>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum List {
        Items(Vec<String>),
        Text(String),
    }

    let items = match List::deserialize(deserializer)? {
        List::Items(items) => items,
        List::Text(text) => text.split(',').map(str::to_owned).collect(),
    };
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        return Err(D::Error::custom("expected at least one item"));
    }
    Ok(items)
}
