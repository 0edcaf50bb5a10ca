//! # Notebase
//!
//! A document ingestion and question-answering pipeline for a student
//! workspace.
//!
//! Notebase ingests uploaded documents (PDF, image, plain text) through a
//! queued, page-batched pipeline — extract text and image captions, chunk
//! with overlap, embed, and write to a per-user vector index — and answers
//! questions by decomposing them, retrieving and synthesizing each
//! sub-question in parallel, and reconciling citations into one globally
//! numbered source list.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │   Jobs   │──▶│   Ingestion    │──▶│  SQLite    │
//! │  queue   │   │ Extract+Chunk │   │ chunks+vec │
//! └──────────┘   │    +Embed     │   └─────┬─────┘
//!                └───────────────┘         │
//!                          ┌───────────────┤
//!                          ▼               ▼
//!                    ┌──────────┐    ┌──────────┐
//!                    │   CLI    │    │   HTTP   │
//!                    │  (nbx)   │    │  server  │
//!                    └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nbx init                                  # create database
//! nbx enqueue notes.pdf --user u1 --class c1
//! nbx run                                   # process pending jobs
//! nbx ask "What is the Krebs cycle?" --user u1
//! nbx serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`jobs`] | Ingestion job queue |
//! | [`ingest`] | Batched ingestion coordinator |
//! | [`extract`] | PDF, image, and text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index reads and writes |
//! | [`query`] | Question decomposition |
//! | [`answer`] | Retrieval and answer synthesis |
//! | [`citations`] | Citation renumbering and dedup |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod citations;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod files;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod query;
pub mod server;
pub mod storage;
