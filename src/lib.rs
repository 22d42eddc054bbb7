//! # ragmill
//!
//! An agent-scoped RAG ingestion and retrieval pipeline.
//!
//! ragmill ingests source documents (web pages, uploaded files, manual
//! text) per agent, chunks and embeds them, and serves similarity search
//! over the stored vectors — all scoped to a tenant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌───────────┐
//! │   Sources     │──▶│     Pipeline       │──▶│  SQLite    │
//! │ URL/file/text │   │ Extract+Chunk+Embed│   │ chunks+vec │
//! └──────────────┘   └───────────────────┘   └─────┬─────┘
//!        ▲                                        │
//!   ┌────┴────┐                            ┌──────▼──────┐
//!   │ Crawler │                            │  Similarity  │
//!   │ sitemap │                            │   search     │
//!   └─────────┘                            └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragmill init                               # create database
//! ragmill agent register sales-bot           # register an agent
//! ragmill ingest-url sales-bot https://shop.example/offers
//! ragmill search sales-bot "summer discount"
//! ragmill stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`agents`] | Agent registry |
//! | [`extract`] | HTML/plain-text extraction |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding client abstraction |
//! | [`ingest`] | Ingestion pipeline and chunk storage |
//! | [`search`] | Similarity search |
//! | [`crawler`] | Offer-page crawler |
//! | [`stats`] | Per-agent statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agents;
pub mod chunk;
pub mod config;
pub mod crawler;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod search;
pub mod stats;
