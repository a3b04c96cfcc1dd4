//! Caching proxy in front of a CMS content export API.
//!
//! Rendered fragments are served from a pluggable store and refreshed in the
//! background whenever the CMS reports a change, together with every fragment
//! that embeds the changed one.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
