//! Query answering: decompose, retrieve, synthesize, reconcile.
//!
//! A request message is split into sub-questions, each answered
//! independently and in parallel: embed the question, rank chunks for the
//! requesting user (optionally scoped to a class), then synthesize an
//! answer grounded only in those chunks. Sub-answers keep the original
//! question order and are merged by the citation reconciler.
//!
//! A question with no retrieved chunks gets a fixed fallback answer and
//! never reaches the language model. A question that fails mid-flight
//! degrades to a failure note instead of sinking the whole request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::citations;
use crate::config::Config;
use crate::embedding;
use crate::files;
use crate::index;
use crate::llm::{ChatClient, Generator};
use crate::models::{ReconciledSource, RetrievedChunk, Source, SourceFile, SubAnswer};
use crate::query;

/// Answer for a question that matched nothing in the user's documents.
pub const NO_INFORMATION_ANSWER: &str =
    "I could not find any relevant information in your documents to answer this question.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You answer questions using only the numbered sources \
provided. Cite every factual statement with its source number in the form [Source N]. If the \
sources do not contain the answer, say so plainly. Never use outside knowledge.";

/// The overall request deadline elapsed before every sub-question
/// finished. Typed so the HTTP layer can map it to its error code without
/// matching on message text.
#[derive(Debug)]
pub struct QueryTimeout(pub u64);

impl std::fmt::Display for QueryTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Query timed out after {}s", self.0)
    }
}

impl std::error::Error for QueryTimeout {}

/// Answer a request message end to end. Returns the merged response text
/// and the globally renumbered source list.
pub async fn run_query(
    config: &Config,
    pool: &SqlitePool,
    message: &str,
    user_id: &str,
    class_id: Option<&str>,
) -> Result<(String, Vec<ReconciledSource>)> {
    let questions = query::split_questions(message);
    anyhow::ensure!(!questions.is_empty(), "Empty query message");

    // One client and one generator choice for the whole request. When the
    // provider is disabled the no-hit path still works; only questions
    // that actually retrieve chunks need the model.
    let chat: Option<Arc<ChatClient>> = if config.llm.is_enabled() {
        Some(Arc::new(
            ChatClient::new(&config.llm).context("Failed to create chat client")?,
        ))
    } else {
        None
    };
    let generator = Generator::select(&config.llm);

    // Tasks live in a JoinSet so a timeout can abort the stragglers —
    // once the request has failed, no sub-question may keep making
    // embedding or model calls on its behalf.
    let mut set = tokio::task::JoinSet::new();
    for (idx, question) in questions.iter().enumerate() {
        let config = config.clone();
        let pool = pool.clone();
        let chat = chat.clone();
        let generator = generator.clone();
        let question = question.clone();
        let user_id = user_id.to_string();
        let class_id = class_id.map(|s| s.to_string());

        set.spawn(async move {
            let sub = answer_question(
                &config,
                &pool,
                chat.as_deref(),
                &generator,
                &question,
                &user_id,
                class_id.as_deref(),
            )
            .await;
            (idx, sub)
        });
    }

    // Completion order is arbitrary; slots restore question order.
    let mut slots: Vec<Option<SubAnswer>> = Vec::new();
    slots.resize_with(questions.len(), || None);

    let overall = Duration::from_secs(config.retrieval.timeout_secs);
    let gather = async {
        while let Some(joined) = set.join_next().await {
            let (idx, sub) = joined?;
            slots[idx] = Some(sub);
        }
        Ok::<(), anyhow::Error>(())
    };

    match tokio::time::timeout(overall, gather).await {
        Ok(result) => result?,
        Err(_) => {
            set.abort_all();
            return Err(anyhow::Error::new(QueryTimeout(
                config.retrieval.timeout_secs,
            )));
        }
    }

    let sub_answers: Vec<SubAnswer> = slots
        .into_iter()
        .map(|s| s.ok_or_else(|| anyhow::anyhow!("Sub-answer missing after join")))
        .collect::<Result<_>>()?;

    Ok(citations::reconcile(&sub_answers))
}

/// Answer one sub-question. Infallible by construction: any error becomes
/// a failure-note sub-answer with no sources.
async fn answer_question(
    config: &Config,
    pool: &SqlitePool,
    chat: Option<&ChatClient>,
    generator: &Generator,
    question: &str,
    user_id: &str,
    class_id: Option<&str>,
) -> SubAnswer {
    match try_answer_question(config, pool, chat, generator, question, user_id, class_id).await {
        Ok(sub) => sub,
        Err(e) => {
            eprintln!("Warning: question failed: {} ({:#})", question, e);
            SubAnswer {
                question: question.to_string(),
                text: format!("I could not answer this question: {}", e),
                sources: Vec::new(),
            }
        }
    }
}

async fn try_answer_question(
    config: &Config,
    pool: &SqlitePool,
    chat: Option<&ChatClient>,
    generator: &Generator,
    question: &str,
    user_id: &str,
    class_id: Option<&str>,
) -> Result<SubAnswer> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, question).await?;

    let hits = index::search_chunks(
        pool,
        &query_vec,
        user_id,
        class_id,
        config.retrieval.top_k,
    )
    .await?;

    if hits.is_empty() {
        return Ok(SubAnswer {
            question: question.to_string(),
            text: NO_INFORMATION_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    let sources = build_sources(pool, &hits).await?;

    let chat = chat.ok_or_else(|| anyhow::anyhow!("LLM provider is disabled"))?;
    let prompt = build_prompt(question, &sources);
    let text = chat
        .complete(generator, SYNTHESIS_SYSTEM_PROMPT, &prompt)
        .await?;

    Ok(SubAnswer {
        question: question.to_string(),
        text,
        sources,
    })
}

/// Turn retrieved chunks into locally numbered sources, fetching each
/// distinct file's display metadata once.
async fn build_sources(pool: &SqlitePool, hits: &[RetrievedChunk]) -> Result<Vec<Source>> {
    let mut file_cache: HashMap<String, SourceFile> = HashMap::new();

    let mut sources = Vec::with_capacity(hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let file = match file_cache.get(&hit.file_id) {
            Some(f) => f.clone(),
            None => {
                let f = source_file_for(pool, hit).await?;
                file_cache.insert(hit.file_id.clone(), f.clone());
                f
            }
        };
        sources.push(Source {
            number: i + 1,
            file,
            page_number: hit.page_number,
            content: hit.text.clone(),
        });
    }
    Ok(sources)
}

async fn source_file_for(pool: &SqlitePool, hit: &RetrievedChunk) -> Result<SourceFile> {
    // Fall back to the chunk's own metadata if the file row is gone.
    Ok(match files::get(pool, &hit.file_id).await? {
        Some(record) => SourceFile {
            id: record.id,
            name: record.display_name,
            file_type: record.mime_type,
            url: record.url,
        },
        None => SourceFile {
            id: hit.file_id.clone(),
            name: hit.file_name.clone(),
            file_type: hit.content_type.clone(),
            url: None,
        },
    })
}

fn build_prompt(question: &str, sources: &[Source]) -> String {
    let mut prompt = String::from("Sources:\n\n");
    for source in sources {
        prompt.push_str(&format!(
            "[Source {}] ({}, page {}):\n{}\n\n",
            source.number, source.file.name, source.page_number, source.content
        ));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hit(chunk_id: &str, file_id: &str, page: i64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: chunk_id.to_string(),
            file_id: file_id.to_string(),
            file_name: format!("{}.pdf", file_id),
            page_number: page,
            content_type: "application/pdf".to_string(),
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn prompt_numbers_sources_locally() {
        let sources = vec![
            Source {
                number: 1,
                file: SourceFile {
                    id: "f1".to_string(),
                    name: "notes.pdf".to_string(),
                    file_type: "application/pdf".to_string(),
                    url: None,
                },
                page_number: 2,
                content: "alpha".to_string(),
            },
            Source {
                number: 2,
                file: SourceFile {
                    id: "f2".to_string(),
                    name: "slides.pdf".to_string(),
                    file_type: "application/pdf".to_string(),
                    url: None,
                },
                page_number: 7,
                content: "beta".to_string(),
            },
        ];
        let prompt = build_prompt("What is alpha?", &sources);
        assert!(prompt.contains("[Source 1] (notes.pdf, page 2):\nalpha"));
        assert!(prompt.contains("[Source 2] (slides.pdf, page 7):\nbeta"));
        assert!(prompt.ends_with("Question: What is alpha?"));
    }

    #[tokio::test]
    async fn no_hits_yields_fixed_answer_without_model() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE doc_chunks (chunk_id TEXT PRIMARY KEY, file_id TEXT, file_name TEXT,
             user_id TEXT, class_id TEXT, folder_id TEXT, page_number INTEGER,
             chunk_index INTEGER, content_type TEXT, text TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE chunk_vectors (chunk_id TEXT PRIMARY KEY, file_id TEXT, embedding BLOB)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut config = Config::minimal();
        config.embedding.provider = "hashed".to_string();
        config.embedding.dims = 16;

        // LLM disabled on purpose: the no-hit path must not need it.
        let sub = answer_question(
            &config,
            &pool,
            None,
            &Generator::Chat,
            "What is the Krebs cycle?",
            "user-1",
            None,
        )
        .await;

        assert_eq!(sub.text, NO_INFORMATION_ANSWER);
        assert!(sub.sources.is_empty());
    }

    #[tokio::test]
    async fn timeout_aborts_in_flight_question_work() {
        use tokio::io::AsyncReadExt;

        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        for ddl in [
            "CREATE TABLE doc_chunks (chunk_id TEXT PRIMARY KEY, file_id TEXT, file_name TEXT,
             user_id TEXT, class_id TEXT, folder_id TEXT, page_number INTEGER,
             chunk_index INTEGER, content_type TEXT, text TEXT, UNIQUE(file_id, chunk_index))",
            "CREATE TABLE chunk_vectors (chunk_id TEXT PRIMARY KEY, file_id TEXT, embedding BLOB)",
            "CREATE TABLE files (id TEXT PRIMARY KEY, display_name TEXT, user_id TEXT,
             class_id TEXT, folder_id TEXT, size INTEGER, mime_type TEXT, status TEXT,
             page_count INTEGER, url TEXT, preview_url TEXT, created_at INTEGER)",
        ] {
            sqlx::query(ddl).execute(&pool).await.unwrap();
        }

        let mut config = Config::minimal();
        config.embedding.provider = "hashed".to_string();
        config.embedding.dims = 16;

        // One indexed chunk so the question reaches the synthesis call.
        let chunk = crate::models::IndexedChunk {
            text: "The Krebs cycle produces ATP.".to_string(),
            file_id: "f1".to_string(),
            file_name: "notes.txt".to_string(),
            user_id: "u1".to_string(),
            class_id: "bio".to_string(),
            folder_id: None,
            page_number: 1,
            chunk_index: 0,
            content_type: "text/plain".to_string(),
        };
        let provider = embedding::create_provider(&config.embedding).unwrap();
        let vectors = embedding::embed_texts(
            provider.as_ref(),
            &config.embedding,
            &[chunk.text.clone()],
        )
        .await
        .unwrap();
        index::write_chunks(&pool, std::slice::from_ref(&chunk), &vectors)
            .await
            .unwrap();

        // Chat endpoint that accepts the request and never responds; it
        // reports when the peer tears the connection down.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        std::env::set_var("OPENAI_API_KEY", "test-key");
        config.llm.provider = "openai".to_string();
        config.llm.base_url = format!("http://{}", addr);
        config.retrieval.timeout_secs = 1;

        let err = run_query(&config, &pool, "What does the Krebs cycle produce?", "u1", None)
            .await
            .expect_err("request should time out");
        assert!(err.downcast_ref::<QueryTimeout>().is_some(), "{:#}", err);

        // The aborted task must drop its request instead of holding the
        // connection open after the request has already failed.
        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("in-flight chat call was not aborted")
            .unwrap();
    }

    #[tokio::test]
    async fn sources_fall_back_to_chunk_metadata() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE files (id TEXT PRIMARY KEY, display_name TEXT, user_id TEXT,
             class_id TEXT, folder_id TEXT, size INTEGER, mime_type TEXT, status TEXT,
             page_count INTEGER, url TEXT, preview_url TEXT, created_at INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let hits = vec![make_hit("c1", "gone", 3, "orphaned chunk text")];
        let sources = build_sources(&pool, &hits).await.unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].number, 1);
        assert_eq!(sources[0].file.name, "gone.pdf");
        assert_eq!(sources[0].page_number, 3);
    }
}
