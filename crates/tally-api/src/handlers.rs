//! REST endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/polls` | Snapshot of every option |
//! | `GET` | `/polls/{option}` | Count for one option |
//! | `GET` | `/healthz` | Liveness and stream state |

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};

use crate::error::QueryError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page listing every option and its count.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.responder.snapshot();
    let stream = state.stream_state();

    let mut rows = String::new();
    for entry in snapshot.iter() {
        let _ = write!(
            rows,
            r#"<li><span class="option">{}</span> <span class="count">{}</span></li>"#,
            escape_html(&entry.option),
            entry.count
        );
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Live Tally</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 640px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.5rem 0; border-bottom: 1px solid #30363d; }}
        .count {{ color: #58a6ff; font-weight: bold; float: right; }}
        a {{ color: #58a6ff; text-decoration: none; }}
    </style>
</head>
<body>
    <h1>Live Tally</h1>
    <p class="subtitle">stream: {stream} &middot; total: {total}</p>
    <ul>{rows}</ul>
    <p><a href="/polls">/polls</a> &middot; <a href="/healthz">/healthz</a> &middot; <code>/ws/tally</code></p>
</body>
</html>"#,
        total = snapshot.total(),
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// GET /polls -- full snapshot
// ---------------------------------------------------------------------------

/// Current count of every tracked option, e.g. `{"Messi": 2, "Suarez": 1}`.
pub async fn get_polls(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.responder.snapshot())
}

// ---------------------------------------------------------------------------
// GET /polls/{option} -- single option
// ---------------------------------------------------------------------------

/// Count for one tracked option.
///
/// # Errors
///
/// Responds 404 for an untracked option and 400 for a blank one.
pub async fn get_poll(
    State(state): State<Arc<AppState>>,
    Path(option): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    let entry = state.responder.count(&option)?;
    Ok(Json(serde_json::json!({
        "option": entry.option,
        "count": entry.count,
    })))
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

/// Liveness probe. Always 200 while the process serves; the stream state
/// tells whether counts are still moving.
pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "stream": state.stream_state().as_str(),
        "options": state.responder.options().len(),
    }))
}
