//! Async client for TR-064/UPnP home gateways
//!
//! The gateway publishes its services in device descriptors. This crate loads
//! them into a registry of [`ServiceProxy`] handles, invokes SOAP actions on
//! them and keeps GENA event subscriptions alive.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tr064::{Tr064Client, Tr064Config};
//!
//! #[tokio::main]
//! async fn main() -> tr064::Result<()> {
//!     tr064::init_logging_from_env().ok();
//!
//!     let client = Tr064Client::new(Tr064Config::new().with_credentials("admin", "secret"))?;
//!     for service in client.describe().await? {
//!         println!("{} ({} actions)", service.id, service.actions.len());
//!     }
//!
//!     // Both naming schemes reach the same service
//!     let wifi = client
//!         .exec("urn:dslforum-org:service:WLANConfiguration:1", "GetInfo", &[])
//!         .await?;
//!     println!("SSID: {:?}", wifi.get("NewSSID"));
//!
//!     client.shutdown().await
//! }
//! ```
//!
//! # Events
//!
//! [`Tr064Client::observe`] starts one local HTTP listener, subscribes every
//! service with evented state variables and returns a broadcast receiver of
//! [`Event`]s. Subscriptions are renewed in the background until
//! [`Tr064Client::shutdown`].
//!
//! # Logging
//!
//! The crate logs through `tracing`. [`init_logging`] and
//! [`init_logging_from_env`] install a subscriber for applications that do
//! not bring their own; see [`LoggingMode`].

mod client;
pub mod config;
pub mod description;
pub mod error;
pub mod events;
mod hosts;
pub mod logging;
pub mod registry;
pub mod resolver;
mod service;
pub mod subscription;

pub use client::{Tr064Client, IGD_DESCRIPTOR, TR064_DESCRIPTOR};
pub use config::Tr064Config;
pub use description::{DeviceInfo, ServiceDescriptor};
pub use error::{Result, Tr064Error};
pub use events::{Event, EventCorrelator};
pub use hosts::{HostInfo, HOSTS, WAN_IP_CONNECTION};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use registry::ServiceRegistry;
pub use service::{ActionDescriptor, ActionResult, ServiceDescription, ServiceProxy, ServiceSummary};
pub use subscription::{SubscriptionInfo, SubscriptionSettings};

// Re-export for custom transports
pub use soap_client::{SoapClient, SoapError, SoapFault, SubscriptionResponse, Transport};
