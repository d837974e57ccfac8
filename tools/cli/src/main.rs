//! drivelink CLI - Command line interface for Drive and Graph file access.
//!
//! Configuration comes from the process environment, optionally backed by a
//! `KEY=value` file given with `--env-file`.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use drivelink_auth::{CredentialStore, GoogleInstalledApp, MicrosoftClientCredentials, Session};
use drivelink_common::config::{DRIVE_REQUIRED_KEYS, GRAPH_REQUIRED_KEYS};
use drivelink_common::{Configuration, EnvLoader, GranteeType, NewPermission, ResourceId, Role};
use drivelink_storage::{gdrive, DriveOperations, GraphFileManager, ProgressFn};
use drivelink_transfer::{CancellationToken, TransferState};

#[derive(Parser)]
#[command(name = "drivelink")]
#[command(about = "drivelink - Google Drive and Microsoft Graph file operations")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Read configuration from a KEY=value file as well as the environment.
    #[arg(long, env = "DRIVELINK_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to Google Drive and store the token.
    Login,

    /// Forget the stored Google Drive token.
    Logout,

    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,

        /// Parent folder id (default: My Drive).
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Look up a folder id by name.
    FindFolder {
        /// Folder name.
        name: String,
    },

    /// Show the parent ids of a folder.
    Parents {
        /// Folder id.
        folder_id: String,
    },

    /// List the contents of a folder.
    Ls {
        /// Folder id.
        folder_id: String,
    },

    /// Upload a local file into a folder.
    Upload {
        /// Destination folder id.
        #[arg(short, long)]
        folder: String,

        /// Local file to upload.
        #[arg(short, long)]
        source: PathBuf,

        /// Remote name (default: the local file name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Download a file by id.
    Download {
        /// File id.
        file_id: String,

        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Find a file by name in a folder and save it locally.
    Fetch {
        /// Folder id.
        #[arg(short, long)]
        folder: String,

        /// File name in the folder.
        #[arg(short, long)]
        name: String,

        /// Local directory to save into.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// List the permissions of a file or folder.
    Perms {
        /// File or folder id.
        id: String,
    },

    /// Grant a permission on a file or folder.
    Share {
        /// File or folder id.
        id: String,

        #[command(flatten)]
        grant: Grant,
    },

    /// Grant a permission on every entry of a folder.
    ShareAll {
        /// Folder id.
        folder_id: String,

        #[command(flatten)]
        grant: Grant,
    },

    /// Delete a folder and everything in it.
    Rmdir {
        /// Folder id.
        folder_id: String,
    },

    /// Print the resource id contained in a shared link.
    ExtractId {
        /// Shared link.
        url: String,
    },

    /// Acquire a Microsoft Graph token with client credentials.
    GraphLogin,

    /// Check whether a file exists under the Graph base folder.
    GraphExists {
        /// File name.
        name: String,
    },

    /// Read a file from the Graph base folder.
    GraphRead {
        /// File name.
        name: String,

        /// Output file path (default: standard output).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a local file into the Graph base folder.
    GraphUpload {
        /// Local file to upload.
        source: PathBuf,

        /// Remote name (default: the local file name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Permission to grant.
#[derive(clap::Args)]
struct Grant {
    /// Role: owner, organizer, fileOrganizer, writer, commenter or reader.
    #[arg(short, long, default_value = "reader")]
    role: Role,

    /// Grantee type: user, group, domain or anyone.
    #[arg(short = 't', long = "type", default_value = "anyone")]
    grantee_type: GranteeType,

    /// Email address (user or group) or domain name (domain).
    #[arg(short, long)]
    email: Option<String>,
}

impl Grant {
    fn to_permission(&self) -> Result<NewPermission> {
        NewPermission::new(self.role, self.grantee_type, self.email.clone())
            .context("Invalid permission")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let env_file = cli.env_file.as_deref();

    match &cli.command {
        Commands::Login => cmd_login(env_file).await,
        Commands::Logout => cmd_logout(env_file).await,
        Commands::Mkdir { name, parent } => cmd_mkdir(env_file, name, parent.as_deref()).await,
        Commands::FindFolder { name } => cmd_find_folder(env_file, name).await,
        Commands::Parents { folder_id } => cmd_parents(env_file, folder_id).await,
        Commands::Ls { folder_id } => cmd_ls(env_file, folder_id).await,
        Commands::Upload {
            folder,
            source,
            name,
        } => cmd_upload(env_file, folder, source, name.as_deref()).await,
        Commands::Download { file_id, output } => cmd_download(env_file, file_id, output).await,
        Commands::Fetch { folder, name, dest } => cmd_fetch(env_file, folder, name, dest).await,
        Commands::Perms { id } => cmd_perms(env_file, id).await,
        Commands::Share { id, grant } => cmd_share(env_file, id, grant).await,
        Commands::ShareAll { folder_id, grant } => cmd_share_all(env_file, folder_id, grant).await,
        Commands::Rmdir { folder_id } => cmd_rmdir(env_file, folder_id).await,
        Commands::ExtractId { url } => cmd_extract_id(url),
        Commands::GraphLogin => cmd_graph_login(env_file).await,
        Commands::GraphExists { name } => cmd_graph_exists(env_file, name).await,
        Commands::GraphRead { name, output } => {
            cmd_graph_read(env_file, name, output.as_deref()).await
        }
        Commands::GraphUpload { source, name } => {
            cmd_graph_upload(env_file, source, name.as_deref()).await
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "drivelink",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

fn load_config(env_file: Option<&Path>, required: &[&str]) -> Result<Configuration> {
    let mut loader = EnvLoader::from_process();
    if let Some(path) = env_file {
        loader = loader.with_dotenv_file(path);
    }
    loader.load(required).context("Failed to load configuration")
}

/// Progress reporter that logs every tenth of a known-size transfer.
fn progress_reporter(label: String) -> Arc<ProgressFn> {
    let last = std::sync::atomic::AtomicU64::new(0);
    Arc::new(move |state: &TransferState| {
        if state.done {
            info!("{}: {} bytes, done", label, state.bytes_sent);
            return;
        }
        if let Some(fraction) = state.fraction() {
            let decile = (fraction * 10.0) as u64;
            if decile > last.swap(decile, std::sync::atomic::Ordering::Relaxed) {
                info!("{}: {}%", label, decile * 10);
            }
        }
    })
}

/// Cancellation token that fires on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current chunk");
            child.cancel();
        }
    });
    token
}

async fn drive_operations(env_file: Option<&Path>, label: &str) -> Result<DriveOperations> {
    let config = load_config(env_file, DRIVE_REQUIRED_KEYS)?;
    let client = gdrive::connect(&config)
        .await
        .context("Failed to connect to Google Drive")?;
    Ok(DriveOperations::new(Arc::new(client))
        .with_cancellation(interrupt_token())
        .with_progress(progress_reporter(label.to_string())))
}

async fn graph_manager(env_file: Option<&Path>) -> Result<GraphFileManager> {
    let config = load_config(env_file, GRAPH_REQUIRED_KEYS)?;
    GraphFileManager::connect(&config)
        .await
        .context("Failed to connect to Microsoft Graph")
}

/// Sign in to Google Drive.
async fn cmd_login(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file, DRIVE_REQUIRED_KEYS)?;
    let authenticator = Arc::new(
        GoogleInstalledApp::authenticator(&config).context("Failed to set up Google sign-in")?,
    );
    let session = Session::start(authenticator)
        .await
        .context("Failed to sign in to Google Drive")?;

    let credential = session.credential().await;
    println!("Signed in to Google Drive.");
    println!("  Expires: {}", credential.expires_at.to_rfc3339());
    println!("  Scopes: {}", credential.scopes.join(" "));

    Ok(())
}

/// Remove the stored Google Drive token.
async fn cmd_logout(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file, &[])?;
    let store = GoogleInstalledApp::token_store(&config);
    store
        .clear()
        .await
        .context("Failed to remove stored token")?;

    println!("Signed out ({} removed).", store.path().display());

    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(env_file: Option<&Path>, name: &str, parent: Option<&str>) -> Result<()> {
    let ops = drive_operations(env_file, name).await?;
    let id = ops
        .create_folder(name, parent)
        .await
        .context("Failed to create folder")?;

    println!("{}", id);

    Ok(())
}

/// Look up a folder by name.
async fn cmd_find_folder(env_file: Option<&Path>, name: &str) -> Result<()> {
    let ops = drive_operations(env_file, name).await?;
    match ops.find_folder(name).await.context("Failed to search folders")? {
        Some(id) => println!("{}", id),
        None => anyhow::bail!("No folder named '{}'", name),
    }

    Ok(())
}

/// Print the parents of a folder.
async fn cmd_parents(env_file: Option<&Path>, folder_id: &str) -> Result<()> {
    let ops = drive_operations(env_file, folder_id).await?;
    let parents = ops
        .folder_parents(folder_id)
        .await
        .context("Failed to read folder parents")?;

    for parent in parents {
        println!("{}", parent);
    }

    Ok(())
}

/// List folder contents.
async fn cmd_ls(env_file: Option<&Path>, folder_id: &str) -> Result<()> {
    let ops = drive_operations(env_file, folder_id).await?;
    let entries = ops
        .list_folder(folder_id)
        .await
        .context("Failed to list folder")?;

    if entries.is_empty() {
        println!("Folder is empty.");
    } else {
        for entry in entries {
            if entry.is_folder() {
                println!("  [DIR]  {}/  {}", entry.name, entry.id);
            } else {
                let size_str = entry
                    .size
                    .map(|s| format!("{} bytes", s))
                    .unwrap_or_default();
                println!("  [FILE] {} ({})  {}", entry.name, size_str, entry.id);
            }
        }
    }

    Ok(())
}

/// Upload a local file.
async fn cmd_upload(
    env_file: Option<&Path>,
    folder: &str,
    source: &Path,
    name: Option<&str>,
) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Source path has no file name")?,
    };

    let ops = drive_operations(env_file, &name).await?;
    let id = ops
        .upload_file(folder, &name, source)
        .await
        .context("Failed to upload file")?;

    println!("{}", id);

    Ok(())
}

/// Download a file by id.
async fn cmd_download(env_file: Option<&Path>, file_id: &str, output: &Path) -> Result<()> {
    let ops = drive_operations(env_file, file_id).await?;
    let content = ops
        .download_file(file_id)
        .await
        .context("Failed to download file")?;

    tokio::fs::write(output, &content)
        .await
        .context("Failed to write output file")?;

    println!(
        "Saved {} ({} bytes)",
        output.display(),
        content.len()
    );

    Ok(())
}

/// Download a file by name.
async fn cmd_fetch(env_file: Option<&Path>, folder: &str, name: &str, dest: &Path) -> Result<()> {
    let ops = drive_operations(env_file, name).await?;
    let path = ops
        .download_named_file(folder, name, dest)
        .await
        .context("Failed to fetch file")?;

    println!("Saved {}", path.display());

    Ok(())
}

/// Print permissions.
async fn cmd_perms(env_file: Option<&Path>, id: &str) -> Result<()> {
    let ops = drive_operations(env_file, id).await?;
    let permissions = ops
        .list_permissions(id)
        .await
        .context("Failed to list permissions")?;

    for permission in permissions {
        println!(
            "  {}  {} {} {}",
            permission.id,
            permission.role,
            permission.grantee_type,
            permission.email_address.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// Grant one permission.
async fn cmd_share(env_file: Option<&Path>, id: &str, grant: &Grant) -> Result<()> {
    let permission = grant.to_permission()?;
    let ops = drive_operations(env_file, id).await?;
    let permission_id = ops
        .set_permission(id, &permission)
        .await
        .context("Failed to set permission")?;

    println!("{}", permission_id);

    Ok(())
}

/// Grant a permission on every entry of a folder.
async fn cmd_share_all(env_file: Option<&Path>, folder_id: &str, grant: &Grant) -> Result<()> {
    let permission = grant.to_permission()?;
    let ops = drive_operations(env_file, folder_id).await?;
    let outcomes = ops
        .assign_permissions_to_all_files(folder_id, &permission)
        .await
        .context("Failed to list folder")?;

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(permission_id) => println!("  ok    {} {}", outcome.file_name, permission_id),
            Err(e) => println!("  error {} {}", outcome.file_name, e),
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} items failed", failed, outcomes.len());
    }

    Ok(())
}

/// Delete a folder.
async fn cmd_rmdir(env_file: Option<&Path>, folder_id: &str) -> Result<()> {
    let ops = drive_operations(env_file, folder_id).await?;
    ops.delete_folder(folder_id)
        .await
        .context("Failed to delete folder")?;

    println!("Folder deleted: {}", folder_id);

    Ok(())
}

/// Print the id in a shared link.
fn cmd_extract_id(url: &str) -> Result<()> {
    let id = ResourceId::from_url(url).context("Failed to extract resource id")?;
    println!("{}", id);
    Ok(())
}

/// Acquire a Graph token.
async fn cmd_graph_login(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file, GRAPH_REQUIRED_KEYS)?;
    let authenticator = Arc::new(
        MicrosoftClientCredentials::authenticator(&config)
            .context("Failed to set up Microsoft sign-in")?,
    );
    let session = Session::start(authenticator)
        .await
        .context("Failed to acquire Microsoft Graph token")?;

    let credential = session.credential().await;
    println!("Microsoft Graph token acquired.");
    println!("  Expires: {}", credential.expires_at.to_rfc3339());

    Ok(())
}

/// Check a Graph file.
async fn cmd_graph_exists(env_file: Option<&Path>, name: &str) -> Result<()> {
    let manager = graph_manager(env_file).await?;
    let exists = manager
        .file_exists(name)
        .await
        .context("Failed to check file")?;

    println!("{}", exists);

    Ok(())
}

/// Read a Graph file.
async fn cmd_graph_read(env_file: Option<&Path>, name: &str, output: Option<&Path>) -> Result<()> {
    let manager = graph_manager(env_file).await?;
    let content = manager.open_file(name).await.context("Failed to read file")?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &content)
                .await
                .context("Failed to write output file")?;
            println!("Saved {} ({} bytes)", path.display(), content.len());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

/// Upload to Graph.
async fn cmd_graph_upload(
    env_file: Option<&Path>,
    source: &Path,
    name: Option<&str>,
) -> Result<()> {
    let manager = graph_manager(env_file).await?;
    let id = manager
        .upload_small(source, name)
        .await
        .context("Failed to upload file")?;

    println!("{}", id);

    Ok(())
}
