use std::sync::Arc;

use quizcast::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), QuizcastError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;

    let questions = match &config.questions_path {
        Some(path) => JsonFileQuestionSource::new(path).load().await?,
        None => {
            tracing::info!("QUIZCAST_QUESTIONS not set, using built-in sample questions");
            sample_questions()
        }
    };

    let host = match &config.host_token {
        Some(token) => StaticHostToken::new(token.as_str()),
        None => StaticHostToken::generate(),
    };
    let host_token = host.token().to_string();

    let server = QuizServer::builder().config(config).build().await?;
    let session = server.create_session(questions, Arc::new(host)).await;

    tracing::info!(
        addr = ?server.local_addr().ok(),
        session_id = %session.session_id(),
        %host_token,
        "default session ready; host connects with HostConnect"
    );

    server.run().await
}
