//! Scripted front end: ask a fixed list of questions in one conversation and
//! print each exchange.

use anyhow::Result;
use std::io::Write;

use crate::credentials::ApiKey;
use crate::query::QueryEngine;
use crate::session::{ChatSession, HistoryFormat};

/// First line of demo output, printed before the index is loaded.
pub fn key_presence_line(key: &ApiKey) -> String {
    format!("API key {} found", key.var())
}

/// Ask `questions` in order, writing `Q:`/`A:` blocks to `out`.
///
/// All questions share one session, so later questions see earlier
/// exchanges. Stops at the first failure.
pub async fn run_demo(
    engine: &QueryEngine,
    questions: &[String],
    out: &mut dyn Write,
) -> Result<ChatSession> {
    let mut session = ChatSession::new(HistoryFormat::QuestionAnswer);
    for question in questions {
        writeln!(out, "Q: {}", question)?;
        out.flush()?;
        let (turn, _) = session.ask(engine, question).await?;
        writeln!(out, "A: {}\n", turn.answer)?;
    }
    Ok(session)
}
