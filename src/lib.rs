//! Cluster inventory extractor core: discovers every available API
//! resource on a Kubernetes-style REST server, fetches and cleans the full
//! object list for each kind, partitions by namespace, optionally collects
//! pod logs, and writes the result to a local directory tree. See
//! `SPEC_FULL.md` for the full component breakdown; `DESIGN.md` for the
//! grounding ledger against the teacher this was built from.

pub mod discovery;
pub mod dump;
pub mod error;
pub mod filter;
pub mod format;
pub mod restclient;
pub mod transform;
pub mod writer;

#[cfg(test)]
pub mod tests;
