//! ACI REST API Client
//!
//! A Rust client library for NetBox-style REST APIs.
//! Collections are exposed as lazy, paginated streams of navigable records
//! that fetch their detail view on demand.
//!
//! # Example
//!
//! ```no_run
//! use aci_client::{AciClient, ClientConfig, ListOptions};
//! use futures::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client
//! let client = AciClient::new(
//!     ClientConfig::new("http://netbox:80/api")
//!         .with_token("your-api-token")
//!         .with_threading(true),
//! )?;
//!
//! // Walk every device, one page at a time
//! let devices = client.endpoint("dcim", "devices");
//! let mut records = devices.all(ListOptions::default())?;
//! while let Some(mut device) = records.try_next().await? {
//!     // Detail-only fields trigger a single hydration call
//!     let serial = device.attr("serial").await?.as_str().map(String::from);
//!     println!("{} {:?}", device, serial);
//! }
//!
//! // Allocate the next free address in a prefix
//! if let Some(prefix) = client.endpoint("ipam", "prefixes").get(1).await? {
//!     let ip = prefix
//!         .detail_endpoint("available-ips")?
//!         .create(&serde_json::json!({"description": "PXE boot server"}))
//!         .await?;
//!     println!("allocated {}", ip["address"]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Lazy Pagination**: Pages are fetched only as the stream is consumed
//! - **Concurrent Pages**: Optional bounded fan-out with ordered results
//! - **Record Graph**: Nested sub-resources are records that hydrate on demand
//! - **Version Gating**: OpenAPI route chosen from the `API-Version` header
//! - **Bulk Operations**: Create, update and delete many objects per call

pub mod client;
pub mod common;
pub mod endpoint;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod record;

pub use client::{AciClient, ClientConfig};
pub use common::query::Request;
pub use common::version::ApiVersion;
pub use common::{HttpRequest, HttpResponse, HttpSession, Method, PaginatedResponse, ReqwestSession};
pub use endpoint::{DetailEndpoint, Endpoint, ListOptions};
pub use error::{AciError, RequestFailure, ResponseBody};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSession;
pub use record::{FieldValue, Hydration, JsonField, Record, RecordSet};
