//! Shared test-only harness, mirroring the teacher's `src/tests/kwok.rs`
//! placement convention but backed by a mock HTTP server instead of a live
//! cluster (SPEC_FULL.md §10): every component this dumper has talks to the
//! Kubernetes API purely over REST, so a `wiremock` server is enough to
//! exercise it without a real `kube-apiserver`/`kwok` binary.
