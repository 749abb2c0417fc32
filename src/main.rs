use std::fs::File;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use log::{error, info, warn};

use pacman_chase::config::read_speed_settings;
use pacman_chase::persist::Persistence;
use pacman_chase::render::TerminalRenderer;
use pacman_chase::{ConfigStore, Difficulty, Dir, Game, GameError, MoveOutcome, SaveSnapshot, StartMode};

enum Command {
    Play(StartMode),
    SetLevel(Difficulty),
}

const INPUT_HOLD_MS: u64 = 160;
const DEFAULT_CONFIG: &str = "config.json";
const DEFAULT_LOG: &str = "pacman.log";

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["continue"] => Command::Play(StartMode::Continue),
        ["new"] => Command::Play(StartMode::NewGame),
        ["level", name] => match name.parse::<Difficulty>() {
            Ok(level) => Command::SetLevel(level),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("usage: pacman [new|continue|level <easy|medium|hard>]");
            return ExitCode::FAILURE;
        }
    };
    let config_path = std::env::var_os("PACMAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = match ConfigStore::open(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mode = match command {
        Command::Play(mode) => mode,
        Command::SetLevel(level) => {
            return match set_level(config, level) {
                Ok(()) => {
                    println!("difficulty set to {level}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            };
        }
    };

    let mut stdout = io::stdout();
    let result = with_terminal(&mut stdout, || run(config, mode));
    match result {
        Ok(snapshot) => {
            println!("Final score: {}", snapshot.score);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "main", "{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Log to `PACMAN_LOG` (default `pacman.log`); the terminal belongs to the
/// game. `RUST_LOG` filters as usual, defaulting to `info`.
fn init_logging() {
    let path = std::env::var_os("PACMAN_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG));
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match File::create(&path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => eprintln!("cannot open log file {}: {e}", path.display()),
    }
    builder.init();
}

fn set_level(config: ConfigStore, level: Difficulty) -> Result<(), GameError> {
    let mut settings = config.read()?.userdata.settings;
    settings.difficulty_set = level;
    let (persist, handle) = Persistence::spawn(config);
    let saved = persist.save_settings(settings);
    handle.close();
    saved
}

fn with_terminal<T>(
    stdout: &mut Stdout,
    body: impl FnOnce() -> Result<T, GameError>,
) -> Result<T, GameError> {
    terminal::enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(Hide)?;

    let result = body();

    stdout.execute(Show)?;
    stdout.execute(LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    result
}

fn run(config: ConfigStore, mode: StartMode) -> Result<SaveSnapshot, GameError> {
    let (timing, render_fps) = read_speed_settings();
    let frame_time = Duration::from_micros(1_000_000 / render_fps.max(1));
    let game = Game::start(config, mode, timing, Box::new(TerminalRenderer::new()))?;
    info!(target: "main", "game started");

    // The game is always shut down, even when input handling failed.
    let played = play(&game, frame_time);
    info!(target: "main", "quitting");
    let saved = game.shutdown();
    played?;
    saved
}

fn play(game: &Game, frame_time: Duration) -> Result<(), GameError> {
    let mut last_seen: [Option<Instant>; 4] = [None; 4];
    let mut last_pressed: Option<Dir> = None;

    loop {
        let frame_start = Instant::now();
        while event::poll(Duration::from_millis(0))? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                continue;
            }
            let dir = match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('k') | KeyCode::Up => Dir::North,
                KeyCode::Char('j') | KeyCode::Down => Dir::South,
                KeyCode::Char('h') | KeyCode::Left => Dir::West,
                KeyCode::Char('l') | KeyCode::Right => Dir::East,
                _ => continue,
            };
            last_seen[idx_for_dir(dir)] = Some(Instant::now());
            last_pressed = Some(dir);
        }

        if game.is_running() {
            if let Some(dir) = active_dir_recent(&last_seen, last_pressed) {
                match game.move_player(dir) {
                    Ok(MoveOutcome::Killed) => info!(target: "main", "walked into an agent"),
                    Ok(_) => {}
                    Err(e) => warn!(target: "main", "move failed: {e}"),
                }
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_time {
            thread::sleep(frame_time - elapsed);
        }
    }
}

/// The direction the player is holding: the last key pressed if it is still
/// held, otherwise the most recently seen held key.
fn active_dir_recent(last_seen: &[Option<Instant>; 4], last_pressed: Option<Dir>) -> Option<Dir> {
    let now = Instant::now();
    let hold = Duration::from_millis(INPUT_HOLD_MS);
    if let Some(dir) = last_pressed {
        if let Some(t) = last_seen[idx_for_dir(dir)] {
            if now.duration_since(t) <= hold {
                return Some(dir);
            }
        }
    }
    let mut best: Option<(Dir, Instant)> = None;
    for dir in Dir::ALL {
        if let Some(t) = last_seen[idx_for_dir(dir)] {
            if now.duration_since(t) <= hold {
                match best {
                    None => best = Some((dir, t)),
                    Some((_, bt)) if t > bt => best = Some((dir, t)),
                    _ => {}
                }
            }
        }
    }
    best.map(|(dir, _)| dir)
}

fn idx_for_dir(dir: Dir) -> usize {
    match dir {
        Dir::East => 0,
        Dir::West => 1,
        Dir::South => 2,
        Dir::North => 3,
    }
}
