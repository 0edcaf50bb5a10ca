//! End-to-end pipeline tests driving the compiled `nbx` binary.
//!
//! Covers: schema init, text ingestion, multi-page PDF ingestion through
//! the page-batch chain, failure handling for unreadable documents, and
//! query behavior against an empty and a populated index.
//!
//! Embeddings use the deterministic `hashed` provider and the LLM stays
//! disabled, so everything here runs offline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn nbx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("nbx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("notes.txt"),
        "The Krebs cycle takes place in the mitochondria.\n\n\
         It produces ATP, NADH, and FADH2 from acetyl-CoA.\n",
    )
    .unwrap();
    fs::write(files_dir.join("seven.pdf"), multi_page_pdf(7)).unwrap();
    fs::write(files_dir.join("broken.pdf"), b"%PDF-1.4\nnot actually a pdf").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/nbx.sqlite"

[storage]
root = "{root}/files"

[chunking]
size = 400
overlap = 40

[ingestion]
batch_pages = 3

[embedding]
provider = "hashed"
dims = 64

[llm]
provider = "disabled"

[retrieval]
top_k = 5
timeout_secs = 30

[server]
bind = "127.0.0.1:7431"
"#,
        root = root.display()
    );

    let config_path = root.join("config").join("nbx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Minimal valid PDF with `n` pages, one line of text per page. Builds
/// the body then the xref with correct byte offsets so lopdf can parse it.
fn multi_page_pdf(n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets.push(out.len());
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for i in 0..n {
        let page_id = 4 + 2 * i;
        let content_id = page_id + 1;

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_id, content_id
            )
            .as_bytes(),
        );

        let stream = format!(
            "BT /F1 12 Tf 72 720 Td (Page {} covers topic number {}) Tj ET\n",
            i + 1,
            i + 1
        );
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                content_id,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let total_objs = 3 + 2 * n;
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", total_objs + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for off in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total_objs + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn run_nbx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = nbx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nbx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nbx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_nbx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_nbx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_text_file_ingestion() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    let (stdout, _, success) = run_nbx(
        &config_path,
        &["enqueue", "notes.txt", "--user", "u1", "--class", "bio"],
    );
    assert!(success, "enqueue failed: {}", stdout);
    assert!(stdout.contains("Enqueued job"));

    let (stdout, stderr, success) = run_nbx(&config_path, &["run"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("notes.txt"));
    assert!(stdout.contains("pages: 1"));
    assert!(stdout.contains("completed: 1"));
    assert!(stdout.contains("failed: 0"));

    let (stdout, _, _) = run_nbx(&config_path, &["files"]);
    assert!(stdout.contains("processed_text"));
    assert!(stdout.contains("pages=1"));
}

#[tokio::test]
async fn test_pdf_batch_chain_covers_all_pages() {
    let (tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    run_nbx(
        &config_path,
        &["enqueue", "seven.pdf", "--user", "u1", "--class", "bio"],
    );

    // 7 pages with batch_pages = 3: windows 1-3, 4-6, 7.
    let (stdout, stderr, success) = run_nbx(&config_path, &["run"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("pages: 7"), "stdout: {}", stdout);
    assert!(stdout.contains("batches: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks written: 7"), "stdout: {}", stdout);
    assert!(stdout.contains("status: processed_text"));

    let (stdout, _, _) = run_nbx(&config_path, &["files"]);
    assert!(stdout.contains("processed_text"));
    assert!(stdout.contains("pages=7"));

    // Every page of the document must be represented in the index.
    let mut cfg = notebase::config::Config::minimal();
    cfg.db.path = tmp.path().join("data").join("nbx.sqlite");
    let pool = notebase::db::connect(&cfg.db).await.unwrap();

    let records = notebase::files::list(&pool, Some("u1")).await.unwrap();
    let pdf = records
        .iter()
        .find(|r| r.display_name == "seven.pdf")
        .expect("file record for seven.pdf");
    let pages = notebase::index::file_page_numbers(&pool, &pdf.id)
        .await
        .unwrap();
    assert_eq!(pages, vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn test_unreadable_pdf_fails_job() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    run_nbx(
        &config_path,
        &["enqueue", "broken.pdf", "--user", "u1", "--class", "bio"],
    );

    let (stdout, stderr, success) = run_nbx(&config_path, &["run"]);
    // A failed job is reported, not fatal to the run.
    assert!(success, "run exited nonzero: {}", stderr);
    assert!(stdout.contains("completed: 0"));
    assert!(stdout.contains("failed: 1"));
    assert!(stderr.contains("failed"));

    let (stdout, _, _) = run_nbx(&config_path, &["jobs"]);
    assert!(stdout.contains("failed"));
    assert!(stdout.contains("broken.pdf"));

    let (stdout, _, _) = run_nbx(&config_path, &["files"]);
    assert!(stdout.contains("error"));
}

#[test]
fn test_ask_with_empty_index_returns_fallback() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    let (stdout, stderr, success) = run_nbx(
        &config_path,
        &["ask", "What is the Krebs cycle?", "--user", "u1"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("could not find any relevant information"),
        "stdout: {}",
        stdout
    );
    assert!(!stdout.contains("Sources:"));
}

#[test]
fn test_ask_answers_each_question_in_order() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    let message = "Answer the following questions:\n\
                   1. What is the Krebs cycle?\n\
                   2. Where does glycolysis happen?";
    let (stdout, _, success) = run_nbx(&config_path, &["ask", message, "--user", "u1"]);
    assert!(success);

    // Empty index: each sub-question gets its own fallback paragraph.
    let count = stdout
        .matches("could not find any relevant information")
        .count();
    assert_eq!(count, 2, "stdout: {}", stdout);
}

#[test]
fn test_ask_with_hits_but_llm_disabled_degrades() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    run_nbx(
        &config_path,
        &["enqueue", "notes.txt", "--user", "u1", "--class", "bio"],
    );
    run_nbx(&config_path, &["run"]);

    // Chunks exist, so retrieval finds hits; synthesis is unavailable and
    // the question degrades to a failure note instead of an error exit.
    let (stdout, stderr, success) = run_nbx(
        &config_path,
        &["ask", "What does the Krebs cycle produce?", "--user", "u1"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("could not answer this question"),
        "stdout: {}",
        stdout
    );
}

#[test]
fn test_retrieval_is_scoped_to_user() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    run_nbx(
        &config_path,
        &["enqueue", "notes.txt", "--user", "u1", "--class", "bio"],
    );
    run_nbx(&config_path, &["run"]);

    // Another user sees nothing.
    let (stdout, _, success) = run_nbx(
        &config_path,
        &["ask", "What does the Krebs cycle produce?", "--user", "u2"],
    );
    assert!(success);
    assert!(
        stdout.contains("could not find any relevant information"),
        "stdout: {}",
        stdout
    );
}

#[test]
fn test_files_scoped_by_user_flag() {
    let (_tmp, config_path) = setup_test_env();
    run_nbx(&config_path, &["init"]);

    run_nbx(
        &config_path,
        &["enqueue", "notes.txt", "--user", "u1", "--class", "bio"],
    );
    run_nbx(&config_path, &["run"]);

    let (stdout, _, _) = run_nbx(&config_path, &["files", "--user", "u1"]);
    assert!(stdout.contains("notes.txt"));

    let (stdout, _, _) = run_nbx(&config_path, &["files", "--user", "nobody"]);
    assert!(stdout.contains("No files."));
}
