//! Generic GENA callback server for receiving UPnP event notifications.
//!
//! This crate provides a lightweight HTTP server for handling `NOTIFY`
//! requests sent by a gateway for its event subscriptions. It knows nothing
//! about TR-064 services: it validates the GENA headers and forwards the raw
//! property-set body together with the `SID` and `SEQ` headers.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds the first free port of a range (or a fixed
//!   port), serves `NOTIFY` on any path and shuts down gracefully.
//! - [`EventRouter`]: forwards every accepted notification to a channel.
//! - [`NotificationPayload`]: subscription id, sequence number and raw XML.
//!
//! Response codes: a notification without a `SID` header is answered with
//! `400`, every other notification with `200`. Notifications are never
//! rejected because of their body; parsing happens in the consuming crate.
//!
//! # Example
//!
//! ```no_run
//! use callback_server::{CallbackServer, NotificationPayload};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::ServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
//!     let server = CallbackServer::new((49300, 49400), tx).await?;
//!
//!     println!("Callback URL: {}", server.callback_url());
//!
//!     while let Some(notification) = rx.recv().await {
//!         println!("{} #{:?}", notification.subscription_id, notification.sequence);
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod router;
mod server;

pub use error::ServerError;
pub use router::{EventRouter, NotificationPayload};
pub use server::{local_address_towards, CallbackServer, ServerOptions};
