//! Client engine for the Courier RPC transport.
//!
//! A [`Client`] owns one TCP connection to a server. Requests are issued with
//! [`Client::send`]; each is stamped with a fresh session id, run through the
//! egress filter chain, and framed onto the socket under the connection's
//! single-writer lock and byte budget. A detached reader loop correlates
//! responses back to their pending requests by session id.
//!
//! ```no_run
//! use courier_client::{Client, ClientOptions};
//! use courier_proto::{Envelope, request_id};
//!
//! # async fn run() -> Result<(), courier_client::ClientError> {
//! let client = Client::new(ClientOptions::new("127.0.0.1:7575"));
//! client.connect().await?;
//!
//! let envelope = Envelope::new(request_id("Storage", "Get"), &b"ping"[..]);
//! let reply = client.send(envelope).await?;
//! # let _ = reply;
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod errors;

pub use client::{Client, ClientOptions};
pub use errors::ClientError;
