use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::ImageReader;
use nanolayer_contracts::chat::{parse_intent, IntentAction, MessageRole, CHAT_HELP_COMMANDS};
use nanolayer_contracts::events::EventWriter;
use nanolayer_contracts::layers::{AssetStore, Layer};
use nanolayer_engine::{GatewayConfig, GeminiGateway, ImageGateway, RequestOutcome, Studio};
use serde_json::{json, Map};

#[derive(Debug, Parser)]
#[command(
    name = "nanolayer",
    version,
    about = "Generate ad creatives and split them into subject and background layers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: type a prompt, then /split the result.
    Chat(ChatArgs),
    /// Generate one creative and optionally split it, then exit.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Directory that receives layer images and the event log.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Event log path; defaults to OUT/events.jsonl when --out is given.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Overrides NANOLAYER_IMAGE_MODEL.
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    /// Split the generated creative into subject and background.
    #[arg(long)]
    split: bool,
    #[command(flatten)]
    session: SessionArgs,
}

const PROGRESS_POLL: Duration = Duration::from_millis(100);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanolayer error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
    }
}

fn build_studio(args: &SessionArgs) -> Result<Studio<GeminiGateway>> {
    let mut config = GatewayConfig::from_env();
    if let Some(model) = args.image_model.as_deref() {
        config = config.with_model(model);
    }
    let studio = Studio::new(GeminiGateway::new(config)?);

    if let Some(out) = args.out.as_ref() {
        fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    }
    let events_path = args
        .events
        .clone()
        .or_else(|| args.out.as_ref().map(|out| out.join("events.jsonl")));
    let Some(events_path) = events_path else {
        return Ok(studio);
    };
    let session_id = args
        .out
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("session-{}", compact_timestamp()));
    Ok(studio.with_events(EventWriter::new(events_path, session_id)))
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let studio = build_studio(&args.session)?;
    let mut renderer = Renderer::new(args.session.out.clone());
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "NanoLayer chat started with {}. Type /help for commands.",
        studio.gateway().config().model
    );
    if let Some(events) = studio.event_writer() {
        println!(
            "Session {} logging to {}",
            events.session_id(),
            events.path().display()
        );
    }
    renderer.render(&studio)?;

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action {
            IntentAction::Noop => continue,
            IntentAction::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent to the model as a creative prompt.");
            }
            IntentAction::Layers => print_layer_sets(&studio.assets()),
            IntentAction::Split { target } => {
                match resolve_original(&studio.assets(), target.as_deref()) {
                    Ok(original_id) => {
                        run_with_progress(&studio, |studio| studio.request_split(&original_id));
                    }
                    Err(reason) => println!("{reason}"),
                }
            }
            IntentAction::Generate { prompt } => {
                run_with_progress(&studio, |studio| studio.submit_prompt(&prompt));
            }
            IntentAction::Unknown { command, .. } => {
                println!("Unknown command: /{command}. Type /help for commands.");
            }
        }
        renderer.render(&studio)?;
    }

    finish_session(&studio, &renderer);
    Ok(())
}

fn run_once(args: RunArgs) -> Result<i32> {
    let studio = build_studio(&args.session)?;
    let mut renderer = Renderer::new(args.session.out.clone());

    let mut outcome = run_with_progress(&studio, |studio| studio.submit_prompt(&args.prompt));
    renderer.render(&studio)?;

    if args.split && outcome == RequestOutcome::Succeeded {
        let original_id = resolve_original(&studio.assets(), None).map_err(anyhow::Error::msg)?;
        outcome = run_with_progress(&studio, |studio| studio.request_split(&original_id));
        renderer.render(&studio)?;
    }

    finish_session(&studio, &renderer);
    Ok(match outcome {
        RequestOutcome::Succeeded => 0,
        RequestOutcome::Ignored | RequestOutcome::Failed => 1,
    })
}

/// Runs one studio request on a worker thread and reports the task label
/// while it is in flight.
fn run_with_progress<G, F>(studio: &Studio<G>, request: F) -> RequestOutcome
where
    G: ImageGateway,
    F: FnOnce(&Studio<G>) -> RequestOutcome + Send,
{
    thread::scope(|scope| {
        let handle = scope.spawn(move || request(studio));
        let mut announced: Option<&str> = None;
        while !handle.is_finished() {
            let task = studio.generation_state().current_task();
            if task.is_some() && task != announced {
                eprintln!("… {}", task.unwrap_or_default());
                announced = task;
            }
            thread::sleep(PROGRESS_POLL);
        }
        handle.join().unwrap_or(RequestOutcome::Failed)
    })
}

fn finish_session<G: ImageGateway>(studio: &Studio<G>, renderer: &Renderer) {
    let Some(events) = studio.event_writer() else {
        return;
    };
    let mut payload = Map::new();
    payload.insert("messages".to_string(), json!(studio.message_count()));
    payload.insert("layers".to_string(), json!(studio.layers().len()));
    payload.insert("files_written".to_string(), json!(renderer.written.len()));
    let phase = studio.generation_state().phase();
    if let Err(err) = events.emit("session_finished", phase, payload) {
        eprintln!("nanolayer warning: event log write failed: {err:#}");
    }
}

/// Picks the ORIGINAL a `/split` applies to: the most recent one when no
/// target is given, otherwise the single original whose id starts with it.
fn resolve_original(assets: &AssetStore, target: Option<&str>) -> Result<String, String> {
    let sets = assets.layer_sets();
    let Some(target) = target.map(str::trim).filter(|value| !value.is_empty()) else {
        return sets
            .first()
            .map(|set| set.original.id.clone())
            .ok_or_else(|| "No assets yet. Describe an ad creative first.".to_string());
    };

    let needle = target.trim_start_matches('#').to_ascii_lowercase();
    let matches: Vec<&Layer> = sets
        .iter()
        .map(|set| set.original)
        .filter(|layer| layer.id.to_ascii_lowercase().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [] => Err(format!("No original asset matches '{target}'.")),
        [layer] => Ok(layer.id.clone()),
        _ => Err(format!(
            "'{target}' matches {} assets; use more of the id.",
            matches.len()
        )),
    }
}

fn print_layer_sets(assets: &AssetStore) {
    let sets = assets.layer_sets();
    if sets.is_empty() {
        println!("No assets generated yet.");
        return;
    }
    for set in sets {
        let original = set.original;
        println!(
            "Asset #{}  {}  \"{}\"",
            original.short_id(),
            original.created_at.format("%H:%M:%S"),
            original.prompt_used
        );
        match (set.subject(), set.background()) {
            (None, None) => println!("  not split yet (/split {})", original.short_id()),
            (subject, background) => {
                for layer in [subject, background].into_iter().flatten() {
                    println!("  {} #{}", layer.layer_type, layer.short_id());
                }
            }
        }
    }
}

/// Prints messages and writes layer files that appeared since the last call.
struct Renderer {
    out: Option<PathBuf>,
    printed: usize,
    written: HashSet<String>,
}

impl Renderer {
    fn new(out: Option<PathBuf>) -> Self {
        Self {
            out,
            printed: 0,
            written: HashSet::new(),
        }
    }

    fn render<G: ImageGateway>(&mut self, studio: &Studio<G>) -> Result<()> {
        let messages = studio.messages();
        for message in messages.iter().skip(self.printed) {
            match message.role {
                MessageRole::User => {}
                MessageRole::Model => println!("{}", message.text),
                MessageRole::System => println!("[!] {}", message.text),
            }
        }
        self.printed = messages.len();

        let Some(out) = self.out.clone() else {
            return Ok(());
        };
        let mut fresh: Vec<Layer> = studio
            .layers()
            .into_iter()
            .filter(|layer| !self.written.contains(&layer.id))
            .collect();
        fresh.reverse();
        for layer in fresh {
            let path = write_layer(&out, &layer)?;
            match image_dimensions(layer.image.bytes()) {
                Some((width, height)) => {
                    println!("  saved {} ({width}x{height})", path.display())
                }
                None => println!("  saved {}", path.display()),
            }
            self.written.insert(layer.id);
        }
        Ok(())
    }
}

fn write_layer(out: &Path, layer: &Layer) -> Result<PathBuf> {
    let path = out.join(format!(
        "{}-{}.{}",
        layer.id,
        layer.layer_type,
        file_extension(layer.image.bytes())
    ));
    fs::write(&path, layer.image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn file_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png")
}

fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn compact_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use chrono::Duration as ChronoDuration;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use nanolayer_contracts::layers::{AssetStore, ImageData, Layer, SplitRole};

    use super::{file_extension, image_dimensions, resolve_original, write_layer};

    fn tiny_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(3, 2))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn store_with(prompts: &[&str]) -> (AssetStore, Vec<Layer>) {
        let mut store = AssetStore::new();
        let mut layers = Vec::new();
        for (age, prompt) in prompts.iter().enumerate() {
            let mut layer = Layer::original(ImageData::png(vec![1]), *prompt);
            layer.created_at -= ChronoDuration::seconds(age as i64);
            store.prepend_original(layer.clone()).unwrap();
            layers.push(layer);
        }
        (store, layers)
    }

    #[test]
    fn split_without_target_uses_newest_original() {
        let (store, layers) = store_with(&["newest", "older"]);
        assert_eq!(resolve_original(&store, None), Ok(layers[0].id.clone()));
        assert_eq!(resolve_original(&store, Some("  ")), Ok(layers[0].id.clone()));
    }

    #[test]
    fn split_target_matches_id_prefix() {
        let (store, layers) = store_with(&["a", "b"]);
        let prefix = format!("#{}", &layers[1].id[..8].to_ascii_uppercase());
        assert_eq!(resolve_original(&store, Some(&prefix)), Ok(layers[1].id.clone()));
    }

    #[test]
    fn split_target_errors_are_explained() {
        let (empty, _) = store_with(&[]);
        assert!(resolve_original(&empty, None)
            .unwrap_err()
            .contains("No assets yet"));

        let (store, layers) = store_with(&["a", "b"]);
        assert!(resolve_original(&store, Some("zz-not-an-id"))
            .unwrap_err()
            .contains("No original asset"));

        let mut with_child = store.clone();
        let subject = Layer::derived(SplitRole::Subject, ImageData::png(vec![2]), &layers[0].id);
        let background =
            Layer::derived(SplitRole::Background, ImageData::png(vec![3]), &layers[0].id);
        let subject_id = subject.id.clone();
        with_child.prepend_split(subject, background).unwrap();
        assert!(resolve_original(&with_child, Some(&subject_id)).is_err());
    }

    #[test]
    fn layer_files_use_sniffed_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let layer = Layer::original(ImageData::png(tiny_png()), "p");
        let path = write_layer(temp.path(), &layer)?;

        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(format!("{}-original.png", layer.id).as_str())
        );
        assert_eq!(fs::read(&path)?, layer.image.bytes());
        assert_eq!(image_dimensions(layer.image.bytes()), Some((3, 2)));
        Ok(())
    }

    #[test]
    fn unknown_bytes_fall_back_to_png() {
        assert_eq!(file_extension(b"not an image"), "png");
        assert_eq!(image_dimensions(b"not an image"), None);
    }
}
