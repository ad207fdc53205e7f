use clap::{Parser, Subcommand};
use postwall_backend::{
    client::{BackendError, Database},
    rest::RestBackend,
};
use postwall_client::{
    comments::CommentThread,
    compose::{Attachment, PostDraft},
    config::Env,
    detail::{PostDetail, like_post},
    error::ClientError,
    feed::{FeedEvent, FeedStore},
    recommend::recommendations,
    search::{SearchState, SearchView},
    session::SessionState,
    settings::Settings,
    stats::{Highlight, load_stats},
    theme::ThemeState,
};
use postwall_common::model::{
    Id,
    comment::Comment,
    post::{Post, PostMarker},
    sort::SortOrder,
};
use std::{fmt::Display, path::PathBuf, sync::Arc};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum CliError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Error waiting for ctrl-c: {0}")]
    Signal(std::io::Error),
    #[error("Only the author of post {0} can change it")]
    NotAuthor(Id<PostMarker>),
}

impl From<BackendError> for CliError {
    fn from(value: BackendError) -> Self {
        Self::Client(value.into())
    }
}

#[derive(Debug, Parser)]
#[command(name = "postwall", version, about = "Read and write posts on the wall")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List posts, page by page.
    Feed {
        #[arg(long, default_value_t = SortOrder::Newest)]
        sort: SortOrder,
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Keep printing new, edited and deleted posts.
        #[arg(long)]
        follow: bool,
    },
    /// Show one post with its comments.
    Show {
        id: Id<PostMarker>,
        #[arg(long)]
        follow: bool,
    },
    Comment {
        id: Id<PostMarker>,
        text: String,
    },
    Like {
        id: Id<PostMarker>,
    },
    Delete {
        id: Id<PostMarker>,
    },
    /// Publish a new post.
    Post {
        text: String,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    Edit {
        id: Id<PostMarker>,
        text: String,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    Search {
        term: String,
    },
    Stats,
    SignUp {
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "POSTWALL_PASSWORD", hide_env_values = true)]
        password: String,
        /// Defaults to the password itself.
        #[arg(long)]
        confirm: Option<String>,
    },
    SignIn {
        email: String,
        #[arg(long, env = "POSTWALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignOut,
    ResetPassword {
        email: String,
    },
    SetName {
        name: String,
    },
    Whoami,
    Theme {
        #[arg(long)]
        toggle: bool,
    },
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postwall_client=info,postwall_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn get_env() -> Result<Env, CliError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    Ok(Env::from_vars(std::env::vars())?)
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    install_tracing();
    let env = get_env()?;

    let settings = Settings::load(&env.settings_path)?;
    let backend = Arc::new(RestBackend::new(
        env.backend_url.clone(),
        env.anon_key.clone(),
    )?);
    backend.restore_session(settings.session).await;
    let mut session = SessionState::init(Arc::clone(&backend)).await?;

    let result = run(cli.command, &env, &backend, &mut session).await;

    session.sync();
    let current = session.session().cloned();
    Settings::update(&env.settings_path, |settings| settings.session = current)?;

    result
}

async fn run(
    command: Command,
    env: &Env,
    backend: &Arc<RestBackend>,
    session: &mut SessionState<RestBackend>,
) -> Result<(), CliError> {
    match command {
        Command::Feed {
            sort,
            pages,
            follow,
        } => feed(backend, env.page_size, sort, pages, follow).await,
        Command::Show { id, follow } => show(backend, id, follow).await,
        Command::Comment { id, text } => {
            let mut thread = CommentThread::open(Arc::clone(backend), id).await?;
            let comment = thread.submit(&text, session.author_label()).await?;
            print_comment(&comment);
            Ok(())
        }
        Command::Like { id } => {
            let post = like_post(backend.as_ref(), id).await?;
            println!("{} likes", post.likes);
            Ok(())
        }
        Command::Delete { id } => {
            owned_post(backend, session, id).await?;
            backend.delete_post(id).await?;
            println!("Deleted post {id}");
            Ok(())
        }
        Command::Post { text, attachments } => {
            let mut draft = PostDraft::new(text);
            attach_all(&mut draft, &attachments)?;
            let post = draft
                .publish(backend.as_ref(), session.author_label(), session.author_id())
                .await?;
            print_post(&post);
            Ok(())
        }
        Command::Edit {
            id,
            text,
            attachments,
        } => {
            let post = owned_post(backend, session, id).await?;
            let mut draft = PostDraft::editing(&post);
            draft.set_body(text);
            attach_all(&mut draft, &attachments)?;
            print_post(&draft.save_edit(backend.as_ref(), id).await?);
            Ok(())
        }
        Command::Search { term } => {
            let mut view = SearchView::new(Arc::clone(backend));
            match view.search(&term).await? {
                SearchState::NotSearched => println!("Enter a search term."),
                SearchState::NoResults => println!("No posts match \"{}\".", term.trim()),
                SearchState::Results(hits) => {
                    for hit in hits {
                        println!("#{} {} ({})", hit.post_id, hit.author, timestamp(hit.created_at));
                        println!("    {}", hit.preview);
                    }
                }
            }
            Ok(())
        }
        Command::Stats => {
            let stats = load_stats(backend.as_ref()).await;
            print_figure("Posts", &stats.posts);
            print_figure("Comments", &stats.comments);
            print_highlight("Most viewed", &stats.most_viewed);
            print_highlight("Most liked", &stats.most_liked);
            print_highlight("Most commented", &stats.most_commented);
            Ok(())
        }
        Command::SignUp {
            email,
            name,
            password,
            confirm,
        } => {
            let confirm = confirm.unwrap_or_else(|| password.clone());
            match session.sign_up(&email, &name, password, &confirm).await? {
                Some(current) => println!("Signed up as {}", current.user.author_label()),
                None => println!("Check {email} for a confirmation link."),
            }
            Ok(())
        }
        Command::SignIn { email, password } => {
            let current = session.sign_in(&email, password).await?;
            println!("Signed in as {}", current.user.author_label());
            Ok(())
        }
        Command::SignOut => {
            session.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
        Command::ResetPassword { email } => {
            session.reset_password(&email).await?;
            println!("If {} has an account, a reset link is on its way.", email.trim());
            Ok(())
        }
        Command::SetName { name } => {
            let user = session.update_display_name(&name).await?;
            println!("Now posting as {}", user.author_label());
            Ok(())
        }
        Command::Whoami => {
            match session.user() {
                Some(user) => println!(
                    "{} <{}>",
                    user.author_label(),
                    user.email.as_deref().unwrap_or("no email")
                ),
                None => println!("Not signed in, posting as {}", session.author_label()),
            }
            Ok(())
        }
        Command::Theme { toggle } => {
            let mut theme = ThemeState::load(&env.settings_path, env.prefers_dark)?;
            if toggle {
                theme.toggle()?;
            }
            println!("{}", theme.theme());
            Ok(())
        }
    }
}

async fn feed(
    backend: &Arc<RestBackend>,
    page_size: u64,
    sort: SortOrder,
    pages: u32,
    follow: bool,
) -> Result<(), CliError> {
    let mut store = FeedStore::open(Arc::clone(backend), page_size).await?;
    store.change_sort(sort);
    store.settle().await?;

    if sort == SortOrder::Newest {
        let recommended = recommendations(backend.as_ref()).await;
        if !recommended.is_empty() {
            println!("Recommended:");
            for post in &recommended {
                println!(
                    "  #{} {} ({} likes): {}",
                    post.post_id, post.author, post.likes, post.summary
                );
            }
            println!();
        }
    }

    // Each further page is what scrolling to the bottom would load.
    for _ in 1..pages {
        if !store.last_post_visible(true) {
            break;
        }
        store.settle().await?;
    }

    for post in store.feed().posts() {
        print_post(post);
    }
    if store.feed().has_more() {
        println!("(more with --pages {})", pages + 1);
    }

    if follow {
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => return signal.map_err(CliError::Signal),
                event = store.next_event() => match event {
                    Some(FeedEvent::LiveInsert(post)) => print_post(&post),
                    Some(FeedEvent::LiveUpdate(post)) => {
                        println!("(edited)");
                        print_post(&post);
                    }
                    Some(FeedEvent::LiveDelete(id)) => println!("(post {id} was deleted)"),
                    Some(FeedEvent::PageLoaded { .. } | FeedEvent::PageFailed { .. }) => {}
                    None => return Ok(()),
                },
            }
        }
    }

    Ok(())
}

async fn show(backend: &Arc<RestBackend>, id: Id<PostMarker>, follow: bool) -> Result<(), CliError> {
    let mut detail = PostDetail::open(Arc::clone(backend), id).await?;
    let mut thread = CommentThread::open(Arc::clone(backend), id).await?;

    print_post(detail.post());
    println!("{}", detail.post().content);
    for url in &detail.post().file_urls {
        println!("  attachment: {url}");
    }
    for comment in thread.comments() {
        print_comment(comment);
    }

    if follow {
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => return signal.map_err(CliError::Signal),
                update = detail.next_update() => match update {
                    Some(post) => print_post(post?),
                    None => return Ok(()),
                },
                comment = thread.next_comment() => match comment {
                    Some(comment) => print_comment(comment?),
                    None => return Ok(()),
                },
            }
        }
    }

    Ok(())
}

async fn owned_post(
    backend: &Arc<RestBackend>,
    session: &SessionState<RestBackend>,
    id: Id<PostMarker>,
) -> Result<Post, CliError> {
    let post = backend
        .fetch_post(id)
        .await?
        .ok_or(ClientError::PostNotFound(id))?;

    if session.can_modify(&post) {
        Ok(post)
    } else {
        Err(CliError::NotAuthor(id))
    }
}

fn attach_all(draft: &mut PostDraft, paths: &[PathBuf]) -> Result<(), CliError> {
    for path in paths {
        let file = Attachment::read(path)?;
        draft.attach(file).map_err(ClientError::from)?;
    }
    Ok(())
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn print_post(post: &Post) {
    let edited = if post.is_edited() { " (edited)" } else { "" };
    println!(
        "#{} {} by {} at {}{edited}",
        post.id,
        post.title,
        post.author,
        timestamp(post.created_at)
    );
    println!(
        "    {} likes, {} comments, {} views{}",
        post.likes,
        post.comment_count,
        post.views,
        if post.file_urls.is_empty() {
            String::new()
        } else {
            format!(", {} attachments", post.file_urls.len())
        }
    );
}

fn print_comment(comment: &Comment) {
    println!(
        "  {} ({}): {}",
        comment.author,
        timestamp(comment.created_at),
        comment.content
    );
}

fn print_figure(label: &str, figure: &Result<u64, ClientError>) {
    match figure {
        Ok(value) => println!("{label}: {value}"),
        Err(error) => print_unavailable(label, error),
    }
}

fn print_highlight(label: &str, highlight: &Result<Option<Highlight>, ClientError>) {
    match highlight {
        Ok(Some(highlight)) => println!(
            "{label}: #{} by {} ({}): {}",
            highlight.post_id, highlight.author, highlight.count, highlight.summary
        ),
        Ok(None) => println!("{label}: none yet"),
        Err(error) => print_unavailable(label, error),
    }
}

fn print_unavailable(label: &str, error: &impl Display) {
    println!("{label}: unavailable ({error})");
}
