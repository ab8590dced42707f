//! Client for the control socket of the Bird BGP daemon, with the workflow
//! used to deploy configuration files and inspect peer sessions.
//!
//! ## Examples
//! ```no_run
//! use bird_proxy::*;
//!
//! // create the client
//! let client = Client::for_unix_socket("/run/bird/bird.ctl");
//!
//! // we can either use raw protocol
//! fn show_status_raw(client: &Client) {
//!     let mut connection = client.sync_connection();
//!     let reply = connection.execute("show status", false);
//!     println!("success: {}, text: {}", reply.success, reply.text);
//! }
//!
//! // or we can use structured exchange
//! async fn show_peers(client: &Client) -> Result<()> {
//!     let mut connection = client.connection();
//!     match connection.run(&ShowProtocolsAll, &[("wildcard", "\"peer_*\"")]).await? {
//!         Outcome::Success(sessions) => {
//!             for s in &sessions {
//!                 println!("received session: {:?}", s);
//!             }
//!         }
//!         Outcome::Failure(message) => {
//!             println!("bird said: {}", message);
//!         }
//!     }
//!     Ok(())
//! }
//!
//! // deployments go through a manager bound to one address family
//! fn deploy(config: &ProxyConfig, content: Vec<u8>) -> Result<()> {
//!     let manager = BirdManager::new("ipv4", config)?;
//!     let outcome = manager.deploy_config(&ConfigUpload::new("bird.conf", content))?;
//!     println!("deployed: {}", outcome.is_success());
//!     Ok(())
//! }
//! ```
//!
//! ## Compatibility
//! This library has been tested against Bird 1.6 and Bird 2

mod client;
pub use client::*;

mod command;
pub use command::*;

mod config;
pub use config::*;

mod connection;
pub use connection::*;

mod error;
pub use error::*;

mod manager;
pub use manager::*;

mod message;
pub use message::*;

mod models;
pub use models::*;

mod reader;
pub use reader::LineReader;

mod storage;
pub use storage::*;
