//! Script helper
//!
//! A [`Script`] remembers the SHA1 digest of its source so it can be run
//! with `EVALSHA`, falling back to `EVAL` when the server has not cached it.
//!
//! ```no_run
//! use kvwire::{Client, ConnectionConfig, Script};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//! let script = Script::new("return KEYS[1] .. ':' .. ARGV[1]");
//! let joined: String = script.invoke(&client, ["user"], ["123"]).await?;
//! assert_eq!(joined, "user:123");
//! # Ok(())
//! # }
//! ```

use crate::client::Client;
use crate::commands::{EvalCommand, EvalShaCommand, ToArg};
use bytes::Bytes;
use kvwire_core::{
    decode::FromWire,
    error::{KvError, KvResult},
    types::Key,
};
use sha1::{Digest, Sha1};
use tracing::debug;

/// A script that can be run on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    source: String,
    sha: String,
}

impl Script {
    /// Create a script from its source code
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let sha = calculate_sha1(&source);
        Self { source, sha }
    }

    /// Hex SHA1 digest of the source
    #[must_use]
    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// Source code
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the script, sending its source only if the server lacks it
    pub async fn invoke<T: FromWire>(
        &self,
        client: &Client,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<T> {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let args: Vec<Bytes> = args.into_iter().map(|a| a.to_arg()).collect();

        let by_sha = EvalShaCommand::<T>::new(self.sha.as_str(), keys.iter(), args.iter());
        match client.execute(by_sha).await {
            Err(e) if is_noscript(&e) => {
                debug!(sha = %self.sha, "Script not cached, sending source");
                client
                    .execute(EvalCommand::<T>::new(self.source.as_str(), keys, args))
                    .await
            }
            other => other,
        }
    }

    /// Cache the script on the server, returning its digest
    pub async fn load(&self, client: &Client) -> KvResult<String> {
        client.script_load(self.source.as_str()).await
    }
}

fn is_noscript(error: &KvError) -> bool {
    error.server_code() == Some("NOSCRIPT")
}

fn calculate_sha1(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
