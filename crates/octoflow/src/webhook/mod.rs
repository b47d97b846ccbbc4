//! Webhook intake: verification, event model, handler registry and dispatch.
//!
//! # Core Components
//!
//! - [`SignatureVerifier`] - HMAC signature verification of raw deliveries
//! - [`EventEnvelope`] - a parsed delivery with its qualified [`EventName`]
//! - [`EventHandler`] - trait for application-provided event processing logic
//! - [`EventDispatcher`] - handler registry and dispatch
//!
//! # Processing Order
//!
//! 1. Verify the signature over the raw body bytes
//! 2. Parse the body into an [`EventEnvelope`]
//! 3. Match handlers against the base name, the qualified name and the wildcard
//! 4. Run every matched handler; collect failures into one error
//!
//! A delivery that fails step 1 or 2 never reaches a handler.
//!
//! # Example
//!
//! ```rust
//! use octoflow::webhook::{
//!     handler_fn, Context, EventDispatcher, SignatureVerifier, WebhookDelivery,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = SignatureVerifier::new("development");
//! let dispatcher = EventDispatcher::new().with_verifier(verifier.clone());
//!
//! dispatcher.on(
//!     "issues",
//!     Arc::new(handler_fn(|context: Context| async move {
//!         println!("{} ({})", context.name(), context.id());
//!         Ok(())
//!     })),
//! )?;
//!
//! let body = br#"{"action":"opened"}"#.to_vec();
//! let signature = verifier.sign(&body);
//! let delivery = WebhookDelivery::new("72d3162e", "issues", Some(signature), body);
//!
//! dispatcher.receive(&delivery).await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod validation;

pub use dispatcher::{EventDispatcher, IntoEventPatterns};
pub use event::{
    EventEnvelope, EventLogContext, EventName, EventPattern, PayloadInstallation, PayloadOwner,
    PayloadRepository, WebhookDelivery, WebhookPayload,
};
pub use handler::{handler_fn, Context, ErrorHandler, EventHandler, HandlerFn};
pub use validation::{SignatureAlgorithm, SignatureVerifier};
