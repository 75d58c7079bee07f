//! Command dispatch: send a finished transcript to the backend, interpret
//! the structured action it returns, and drive the storefront through the
//! router/cart ports.
//!
//! The wire shapes mirror the storefront API: commands go out as
//! `{ text, context }`, responses come back as `{ text, action? }`. Unknown
//! action kinds are logged and ignored so a newer backend never breaks an
//! older shell.

pub mod http;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::VoiceError;

pub use http::HttpCommandTransport;

/// Spoken text shown when command processing fails.
pub const FALLBACK_ERROR_TEXT: &str = "Sorry, I encountered an error processing your request.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Where the user is in the storefront when a command is issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl CommandContext {
    /// Overlay `other` on top of this context; set fields win, map entries
    /// are merged key by key.
    pub fn merge(&mut self, other: CommandContext) {
        if other.current_route.is_some() {
            self.current_route = other.current_route;
        }
        if other.page_title.is_some() {
            self.page_title = other.page_title;
        }
        self.query.extend(other.query);
        self.params.extend(other.params);
    }
}

/// A finished voice command ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub context: CommandContext,
}

impl Command {
    pub fn new(text: impl Into<String>, context: CommandContext) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
            context,
        }
    }
}

/// What the backend made of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    /// Text to speak back to the user.
    pub text: String,
    /// Structured action to apply to the storefront, if any.
    pub action: Option<Action>,
    /// Whether this response stands in for a processing failure.
    pub error: bool,
}

impl CommandResponse {
    /// The canned response used when processing fails.
    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_ERROR_TEXT.to_string(),
            action: None,
            error: true,
        }
    }

    /// Parse a backend response body. The body must carry `text`; `action`
    /// is optional and unknown kinds survive as `Action::Unknown`.
    pub fn from_value(value: &Value) -> Result<Self, VoiceError> {
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VoiceError::Transport("command response is missing the text field".into())
            })?
            .to_string();
        let action = value.get("action").and_then(Action::from_value);
        Ok(Self {
            text,
            action,
            error: false,
        })
    }
}

/// Structured storefront action carried in a command response.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate {
        path: String,
    },
    AddToCart {
        product_id: String,
        name: Option<String>,
        price: Option<f64>,
        image: Option<String>,
        quantity: Option<u32>,
    },
    Search {
        query: String,
    },
    Checkout,
    /// An action kind this shell does not understand.
    Unknown {
        kind: String,
    },
}

impl Action {
    /// Parse an action object. Returns `None` when the value has no usable
    /// `type` field or a known type is missing its required payload.
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type").and_then(Value::as_str)?;
        match kind {
            "navigate" => Some(Action::Navigate {
                path: value.get("path").and_then(Value::as_str)?.to_string(),
            }),
            "addToCart" => Some(Action::AddToCart {
                // Product ids arrive as numbers or strings depending on the
                // backend version; normalize both to strings.
                product_id: match value.get("productId") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return None,
                },
                // Older backend responses carry the name as `productName`.
                name: value
                    .get("name")
                    .or_else(|| value.get("productName"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                price: value.get("price").and_then(Value::as_f64),
                image: value
                    .get("image")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                quantity: value
                    .get("quantity")
                    .and_then(Value::as_u64)
                    .map(|q| q as u32),
            }),
            "search" => Some(Action::Search {
                query: value.get("query").and_then(Value::as_str)?.to_string(),
            }),
            "checkout" => Some(Action::Checkout),
            other => Some(Action::Unknown {
                kind: other.to_string(),
            }),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Action::Navigate { path } => {
                map.serialize_entry("type", "navigate")?;
                map.serialize_entry("path", path)?;
            }
            Action::AddToCart {
                product_id,
                name,
                price,
                image,
                quantity,
            } => {
                map.serialize_entry("type", "addToCart")?;
                map.serialize_entry("productId", product_id)?;
                if let Some(name) = name {
                    map.serialize_entry("name", name)?;
                }
                if let Some(price) = price {
                    map.serialize_entry("price", price)?;
                }
                if let Some(image) = image {
                    map.serialize_entry("image", image)?;
                }
                if let Some(quantity) = quantity {
                    map.serialize_entry("quantity", quantity)?;
                }
            }
            Action::Search { query } => {
                map.serialize_entry("type", "search")?;
                map.serialize_entry("query", query)?;
            }
            Action::Checkout => {
                map.serialize_entry("type", "checkout")?;
            }
            Action::Unknown { kind } => {
                map.serialize_entry("type", kind)?;
            }
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Storefront ports
// ---------------------------------------------------------------------------

/// An item added to the cart by a voice command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub quantity: u32,
}

/// Navigation side of the storefront shell.
pub trait RouterPort: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Cart side of the storefront shell.
pub trait CartPort: Send + Sync {
    fn add_item(&self, item: CartItem);
}

/// Sends a command to whatever interprets it.
pub trait CommandTransport: Send + Sync {
    fn send(
        &self,
        command: &Command,
    ) -> Pin<Box<dyn Future<Output = Result<CommandResponse, VoiceError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes finished transcripts through the transport and applies the
/// resulting action to the storefront.
pub struct CommandDispatcher {
    transport: Box<dyn CommandTransport>,
    router: Arc<dyn RouterPort>,
    cart: Arc<dyn CartPort>,
}

impl CommandDispatcher {
    pub fn new(
        transport: Box<dyn CommandTransport>,
        router: Arc<dyn RouterPort>,
        cart: Arc<dyn CartPort>,
    ) -> Self {
        Self {
            transport,
            router,
            cart,
        }
    }

    /// Send the command and return the backend's response.
    pub async fn process(&self, command: &Command) -> Result<CommandResponse, VoiceError> {
        debug!("Dispatching command: {:?}", command.text);
        self.transport.send(command).await
    }

    /// Apply a response's action to the storefront. Unknown actions are
    /// logged and dropped.
    pub fn route_action(&self, action: &Action) {
        match action {
            Action::Navigate { path } => {
                debug!("Action: navigate to {}", path);
                self.router.navigate(path);
            }
            Action::Search { query } => {
                let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes())
                    .collect();
                let path = format!("/search?q={}", encoded);
                debug!("Action: search for {:?} via {}", query, path);
                self.router.navigate(&path);
            }
            Action::Checkout => {
                debug!("Action: checkout");
                self.router.navigate("/checkout");
            }
            Action::AddToCart {
                product_id,
                name,
                price,
                image,
                quantity,
            } => {
                let item = CartItem {
                    id: product_id.clone(),
                    name: name.clone().unwrap_or_else(|| "Product".to_string()),
                    price: price.unwrap_or(0.0),
                    image: image.clone(),
                    quantity: quantity.unwrap_or(1),
                };
                debug!("Action: add {} x{} to cart", item.id, item.quantity);
                self.cart.add_item(item);
            }
            Action::Unknown { kind } => {
                warn!("Ignoring unknown action type {:?}", kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct RecordingRouter {
        pub paths: Mutex<Vec<String>>,
    }

    impl RecordingRouter {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                paths: Mutex::new(Vec::new()),
            })
        }
    }

    impl RouterPort for RecordingRouter {
        fn navigate(&self, path: &str) {
            self.paths.lock().unwrap().push(path.to_string());
        }
    }

    pub(crate) struct RecordingCart {
        pub items: Mutex<Vec<CartItem>>,
    }

    impl RecordingCart {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(Vec::new()),
            })
        }
    }

    impl CartPort for RecordingCart {
        fn add_item(&self, item: CartItem) {
            self.items.lock().unwrap().push(item);
        }
    }

    struct StaticTransport {
        response: CommandResponse,
    }

    impl CommandTransport for StaticTransport {
        fn send(
            &self,
            _command: &Command,
        ) -> Pin<Box<dyn Future<Output = Result<CommandResponse, VoiceError>> + Send + '_>>
        {
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    fn dispatcher(
        response: CommandResponse,
    ) -> (CommandDispatcher, Arc<RecordingRouter>, Arc<RecordingCart>) {
        let router = RecordingRouter::new();
        let cart = RecordingCart::new();
        let dispatcher = CommandDispatcher::new(
            Box::new(StaticTransport { response }),
            Arc::clone(&router) as Arc<dyn RouterPort>,
            Arc::clone(&cart) as Arc<dyn CartPort>,
        );
        (dispatcher, router, cart)
    }

    #[test]
    fn parses_navigate_action() {
        let value = serde_json::json!({
            "text": "Taking you to the sarees collection",
            "action": { "type": "navigate", "path": "/collections/sarees" }
        });
        let response = CommandResponse::from_value(&value).unwrap();
        assert_eq!(
            response.action,
            Some(Action::Navigate {
                path: "/collections/sarees".into()
            })
        );
        assert!(!response.error);
    }

    #[test]
    fn numeric_product_id_becomes_string() {
        let value = serde_json::json!({ "type": "addToCart", "productId": 42 });
        let action = Action::from_value(&value).unwrap();
        assert!(matches!(action, Action::AddToCart { ref product_id, .. } if product_id == "42"));
    }

    #[test]
    fn product_name_alias_is_accepted() {
        let value = serde_json::json!({
            "type": "addToCart",
            "productId": "sku-3",
            "productName": "Banarasi Saree"
        });
        let action = Action::from_value(&value).unwrap();
        assert!(
            matches!(action, Action::AddToCart { ref name, .. } if name.as_deref() == Some("Banarasi Saree"))
        );
    }

    #[test]
    fn unknown_action_type_is_preserved() {
        let value = serde_json::json!({ "type": "applyCoupon", "code": "FESTIVE10" });
        assert_eq!(
            Action::from_value(&value),
            Some(Action::Unknown {
                kind: "applyCoupon".into()
            })
        );
    }

    #[test]
    fn response_without_text_is_an_error() {
        let value = serde_json::json!({ "action": { "type": "checkout" } });
        assert!(CommandResponse::from_value(&value).is_err());
    }

    #[test]
    fn search_action_navigates_with_encoded_query() {
        let (dispatcher, router, _cart) = dispatcher(CommandResponse::fallback());
        dispatcher.route_action(&Action::Search {
            query: "silk sarees".into(),
        });
        assert_eq!(
            *router.paths.lock().unwrap(),
            vec!["/search?q=silk+sarees".to_string()]
        );
    }

    #[test]
    fn checkout_action_navigates_to_checkout() {
        let (dispatcher, router, _cart) = dispatcher(CommandResponse::fallback());
        dispatcher.route_action(&Action::Checkout);
        assert_eq!(*router.paths.lock().unwrap(), vec!["/checkout".to_string()]);
    }

    #[test]
    fn add_to_cart_fills_defaults() {
        let (dispatcher, _router, cart) = dispatcher(CommandResponse::fallback());
        dispatcher.route_action(&Action::AddToCart {
            product_id: "sku-17".into(),
            name: None,
            price: None,
            image: None,
            quantity: None,
        });
        let items = cart.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Product");
        assert_eq!(items[0].price, 0.0);
        assert_eq!(items[0].quantity, 1);
    }

    #[test]
    fn unknown_action_touches_nothing() {
        let (dispatcher, router, cart) = dispatcher(CommandResponse::fallback());
        dispatcher.route_action(&Action::Unknown {
            kind: "mystery".into(),
        });
        assert!(router.paths.lock().unwrap().is_empty());
        assert!(cart.items.lock().unwrap().is_empty());
    }

    #[test]
    fn context_merge_overlays_set_fields() {
        let mut base = CommandContext {
            current_route: Some("/".into()),
            page_title: Some("Home".into()),
            ..Default::default()
        };
        base.merge(CommandContext {
            current_route: Some("/collections/sarees".into()),
            query: [("sort".to_string(), "price".to_string())].into(),
            ..Default::default()
        });
        assert_eq!(base.current_route.as_deref(), Some("/collections/sarees"));
        assert_eq!(base.page_title.as_deref(), Some("Home"));
        assert_eq!(base.query.get("sort").map(String::as_str), Some("price"));
    }

    #[test]
    fn action_serializes_to_wire_shape() {
        let action = Action::AddToCart {
            product_id: "sku-9".into(),
            name: Some("Kanjeevaram Saree".into()),
            price: Some(249.0),
            image: None,
            quantity: Some(2),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "addToCart");
        assert_eq!(value["productId"], "sku-9");
        assert_eq!(value["quantity"], 2);
        assert!(value.get("image").is_none());
    }
}
