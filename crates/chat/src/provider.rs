pub(crate) mod bailian;
pub(crate) mod qianfan;

use crate::{
    error::ChatError,
    messages::{ChatChunk, ChunkUsage, Turn},
};

/// Caller fields stamped into the first chunk of a stream.
#[derive(Debug, Clone)]
pub(crate) struct CallerIdentity {
    /// The model name the client asked for; the upstream-reported name wins
    /// over this when the provider includes one.
    pub requested_model: String,
    /// The caller's external id.
    pub user_id: String,
    /// The caller's display name.
    pub user_name: String,
}

/// Translates one upstream backend's wire format into the canonical chunk
/// protocol.
///
/// One implementation per provider, selected by the model's registered
/// provider type; adding a backend means adding one variant here. Every
/// method re-parses the raw chunk it is handed: raw chunks are small, and
/// keeping the methods independent lets a parse failure in one of them be
/// recovered without poisoning the others.
pub(crate) trait Reframer: Send + Sync {
    /// Provider identifier this reframer serves, e.g. `qianfan`.
    fn provider(&self) -> &'static str;

    /// Merge static model parameters with the assembled turns under the
    /// provider's request envelope. Pure; exactly one turns array results.
    fn build_request(&self, params: &serde_json::Value, turns: &[Turn]) -> serde_json::Value;

    /// Provider-specific headers required to enable streaming.
    fn streaming_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Whether this raw chunk carries the provider's terminal marker.
    ///
    /// Malformed chunks are not terminal; classification must never end the
    /// stream early.
    fn is_terminal(&self, raw: &str) -> bool;

    /// The content delta of this raw chunk, empty when absent or unparsable.
    ///
    /// Used for the persistence accumulator, which must never disturb the
    /// client-visible sequence, so this is lenient by contract.
    fn delta(&self, raw: &str) -> String;

    /// Upstream-reported token usage, zeroed when absent.
    fn usage(&self, raw: &str) -> ChunkUsage;

    /// Build the first canonical chunk, stamped with identity metadata.
    fn first(&self, raw: &str, caller: &CallerIdentity) -> Result<ChatChunk, ChatError>;

    /// Build a middle canonical chunk.
    fn middle(&self, raw: &str) -> Result<ChatChunk, ChatError>;

    /// Build the terminal canonical chunk, carrying token usage.
    fn last(&self, raw: &str) -> Result<ChatChunk, ChatError>;
}

