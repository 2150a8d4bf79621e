//! # corpus-harvest
//!
//! An incremental, deduplicated document corpus builder for slow, rate
//! limited and occasionally broken upstream sources.
//!
//! Sources are enumerated through discovery requests, each request is
//! indexed into lightweight entries, and every entry is materialized into
//! exactly one line of a JSONL corpus. All intermediate state lives on disk,
//! so an interrupted run resumes where it stopped.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//! │  Sources    │──▶│  indices/   │──▶│  index/    │──▶│ corpus.jsonl │
//! │ FS / HTTP   │   │  requests   │   │  batches   │   │  documents   │
//! └─────────────┘   └─────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mkcorpus sources                  # check configured sources
//! mkcorpus create                   # build or refresh the corpus
//! mkcorpus create --sources fca,hca # only some sources
//! mkcorpus stats                    # per-source counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Requests, responses, entries, batches, documents |
//! | [`error`] | Fetch and source failure classes |
//! | [`retry`] | Exponential backoff with jitter |
//! | [`fetch`] | Rate-limited, retrying fetcher |
//! | [`source`] | The source adapter trait |
//! | [`source_fs`] | Filesystem source |
//! | [`source_http`] | Paginated JSON listing source |
//! | [`registry`] | Configured source registry |
//! | [`state`] | On-disk state layout |
//! | [`versions`] | Artifact format versions |
//! | [`jsonl`] | JSONL reading, appending and atomic rewrites |
//! | [`index`] | Discovery caching and indexing |
//! | [`corpus`] | Corpus repair and backfill |
//! | [`engine`] | The end-to-end run |
//! | [`workers`] | Bounded pool for CPU-bound extraction |
//! | [`extract`] | PDF, DOCX and text extraction |
//! | [`progress`] | Progress reporting on stderr |
//! | [`sources`] | `mkcorpus sources` |
//! | [`stats`] | `mkcorpus stats` |

pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod jsonl;
pub mod models;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod source;
pub mod source_fs;
pub mod source_http;
pub mod sources;
pub mod state;
pub mod stats;
pub mod versions;
pub mod workers;
