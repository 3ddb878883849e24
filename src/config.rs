use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tracking {
    pub ema_alpha: f32,
    pub blink_threshold: f32,
    pub min_blink_duration_s: f32,
    pub min_landmarks: usize,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            ema_alpha: 0.4,
            blink_threshold: 0.12,
            min_blink_duration_s: 0.08,
            min_landmarks: 468,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Eyes {
    pub left: [usize; 6],
    pub right: [usize; 6],
}

impl Default for Eyes {
    fn default() -> Self {
        Self {
            left: [33, 160, 158, 133, 153, 144],
            right: [362, 385, 387, 263, 373, 380],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Screen {
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
    pub padding: f32,
    pub target_inset: f32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            zoom: 3.0,
            padding: 10.0,
            target_inset: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Stages {
    pub morning_s: u64,
    pub maze_s: u64,
    pub test_s: u64,
    pub nighttime_close_s: f32,
    pub tick_ms: u64,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            morning_s: 75,
            maze_s: 75,
            test_s: 75,
            nighttime_close_s: 4.0,
            tick_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub eyes: Eyes,
    #[serde(default)]
    pub screen: Screen,
    #[serde(default)]
    pub stages: Stages,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),
    #[error("tracking.ema_alpha must be in (0,1], got {0}")]
    Alpha(f32),
    #[error("tracking.blink_threshold must be in (0,1), got {0}")]
    BlinkThreshold(f32),
    #[error("tracking.min_blink_duration_s must not be negative, got {0}")]
    MinBlink(f32),
    #[error("tracking.min_landmarks must cover eye index {index}, got {min}")]
    Landmarks { min: usize, index: usize },
    #[error("screen.{0} must be positive")]
    Screen(&'static str),
    #[error("screen.padding must be smaller than half the screen")]
    Padding,
    #[error("stages.{0} must be positive")]
    Stage(&'static str),
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot locate home directory"))?;
    Ok(dirs.home_dir().join(".config").join("winkctl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_or_install_in(&config_dir()?)
    }

    pub fn load_or_install_in(cfgdir: &Path) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)
            .with_context(|| format!("failed to create {}", profdir.display()))?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir.to_path_buf(),
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    /// Re-read the active profile. On error the previous profile is kept.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self, socket: &Path) -> serde_json::Value {
        serde_json::json!({
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "active_profile_valid": load_profile(&self.profiles_dir, &self.active_name).is_ok(),
            "socket_present": socket.exists(),
            "screen": {
                "width": self.profile.screen.width,
                "height": self.profile.screen.height,
            },
            "hints": {
                "input": "pipe detector results as JSON lines: winkctl start --input <fifo>",
                "screen": "set [screen] width/height to the display resolution",
            }
        })
    }
}

fn load_profile(profdir: &Path, name: &str) -> Result<Profile> {
    let path = profdir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    let profile = parse_profile(&txt).with_context(|| format!("in {}", path.display()))?;
    Ok(profile)
}

pub fn parse_profile(txt: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(txt).map_err(|e| anyhow!("failed to parse: {e}"))?;
    validate_profile(&profile)?;
    Ok(profile)
}

pub fn validate_profile(p: &Profile) -> std::result::Result<(), ProfileError> {
    let t = &p.tracking;
    let s = &p.screen;
    let st = &p.stages;

    // NaN slips through every comparison below
    for (name, v) in [
        ("tracking.ema_alpha", t.ema_alpha),
        ("tracking.blink_threshold", t.blink_threshold),
        ("tracking.min_blink_duration_s", t.min_blink_duration_s),
        ("screen.width", s.width),
        ("screen.height", s.height),
        ("screen.zoom", s.zoom),
        ("screen.padding", s.padding),
        ("screen.target_inset", s.target_inset),
        ("stages.nighttime_close_s", st.nighttime_close_s),
    ] {
        if !v.is_finite() {
            return Err(ProfileError::NonFinite(name));
        }
    }

    if !(t.ema_alpha > 0.0 && t.ema_alpha <= 1.0) {
        return Err(ProfileError::Alpha(t.ema_alpha));
    }
    if !(t.blink_threshold > 0.0 && t.blink_threshold < 1.0) {
        return Err(ProfileError::BlinkThreshold(t.blink_threshold));
    }
    if t.min_blink_duration_s < 0.0 {
        return Err(ProfileError::MinBlink(t.min_blink_duration_s));
    }
    let max_index = p.eyes.left.iter().chain(&p.eyes.right).copied().max().unwrap_or(0);
    if max_index >= t.min_landmarks {
        return Err(ProfileError::Landmarks {
            min: t.min_landmarks,
            index: max_index,
        });
    }

    if s.width <= 0.0 {
        return Err(ProfileError::Screen("width"));
    }
    if s.height <= 0.0 {
        return Err(ProfileError::Screen("height"));
    }
    if s.zoom <= 0.0 {
        return Err(ProfileError::Screen("zoom"));
    }
    if s.padding < 0.0 || 2.0 * s.padding >= s.width.min(s.height) {
        return Err(ProfileError::Padding);
    }

    for (name, v) in [
        ("morning_s", st.morning_s),
        ("maze_s", st.maze_s),
        ("test_s", st.test_s),
        ("tick_ms", st.tick_ms),
    ] {
        if v == 0 {
            return Err(ProfileError::Stage(name));
        }
    }
    if st.nighttime_close_s <= 0.0 {
        return Err(ProfileError::Stage("nighttime_close_s"));
    }
    Ok(())
}
