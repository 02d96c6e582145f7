use actix_web::{App, HttpServer, web::Data};
use actix_files as fs;
use anyhow::Context;
use dotenv::dotenv;
use log::{info, error};
use tera::Tera;

use groq_chat::chat::{ChatSession, ConversationHistory};
use groq_chat::config::AppConfig;
use groq_chat::model::{ChatTransport, GroqClient};
use groq_chat::web::{routes, AppState};

fn load_templates() -> anyhow::Result<Tera> {
    let mut tera = Tera::new("templates/**/*").context("failed to parse templates")?;
    tera.autoescape_on(vec![".html"]);
    Ok(tera)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Groq chat application");

    // A missing credential stops the app before any session exists
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let tera = match load_templates() {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {:#}", e);
            std::process::exit(1);
        }
    };

    let transport: Box<dyn ChatTransport> =
        Box::new(GroqClient::new(config.api_key.clone(), config.base_url.clone()));
    let history = ConversationHistory::with_system_prompt(config.system_prompt.clone());
    let app_state = Data::new(AppState::new(
        tera,
        config.defaults.clone(),
        ChatSession::with_history(transport, history),
    ));

    info!("Listening on http://{}:{}", config.bind_addr, config.port);

    // Start web server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", "./static"))
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
