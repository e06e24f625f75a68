//! Status and sub-status codes the execution engine inspects.
//!
//! Only the handful of codes the engine reacts to are named here; every other
//! code passes through failed pages untouched.

/// HTTP-level status codes with engine-visible semantics.
pub mod status_code {
    /// The addressed resource is gone; meaning depends on the sub-status.
    pub const GONE: u16 = 410;
    /// Backend throttled the request; carries a retry-after hint.
    pub const TOO_MANY_REQUESTS: u16 = 429;
    /// Catch-all for faults converted to pages by the outer wrapper.
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// Construction-contract violations surfaced as failed pages.
    pub const BAD_REQUEST: u16 = 400;
}

/// Sub-status codes qualifying a `GONE` response.
pub mod sub_status_code {
    /// No qualifying sub-status.
    pub const UNKNOWN: u32 = 0;
    /// The cached routing metadata names a collection that was recreated.
    pub const NAME_CACHE_IS_STALE: u32 = 1000;
    /// The partition key range split; child ranges must be re-resolved.
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    /// The range was merged away; not resumable, surfaced to the caller.
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
}
