//! # Inkvault
//!
//! The AI core of a local-first writing app: generation through an
//! external CLI tool, and a reference-vault ingestion pipeline that turns
//! uploaded documents into embedded, searchable chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Generation   │   │  Ingestion   │──▶│  SQLite   │
//! │ batch+stream  │   │ extract →    │   │ items +  │
//! │ (subprocess)  │   │ chunk → embed│   │ vectors  │
//! └──────┬────────┘   └──────────────┘   └──────────┘
//!        │
//!        ▼
//!   external tool
//!   (NDJSON stdout)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ink init                        # create database
//! ink status                      # probe the generation tool
//! ink generate "Summarize this"   # one-shot generation
//! ink ingest ./paper.pdf          # extract, chunk, embed
//! ink items                       # list vault items
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`sanitize`] | Prompt/context input hardening |
//! | [`classify`] | Tool failure classification |
//! | [`context`] | Budgeted prompt context assembly |
//! | [`generate`] | Single-flight batch invocation engine |
//! | [`stream`] | Streaming invocation engine |
//! | [`proc`] | Subprocess lifecycle helpers |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`embed`] | Batched embedding with order restore |
//! | [`pipeline`] | Ingestion state machine |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backoff;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod context;
pub mod db;
pub mod embed;
pub mod extract;
pub mod framer;
pub mod generate;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod proc;
pub mod sanitize;
pub mod stream;
