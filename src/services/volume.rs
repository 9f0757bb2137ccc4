//! Volume service: a fixed 0-100 scale with mute as volume 0

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::state::{StateMap, StatefulService};
use crate::mpd::{MpdError, SharedPlayer};

pub const SERVICE_NAME: &str = "volume";

const VOLUME_MAX: u32 = 100;
const MILLI_DB_PER_STEP: u32 = 500;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error(transparent)]
    Player(#[from] MpdError),
    #[error("unsupported value {0}: only 0 is accepted")]
    Unsupported(i32),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Characteristics {
    pub volume_max: u32,
    pub volume_unity: u32,
    pub volume_steps: u32,
    pub volume_milli_db_per_step: u32,
    pub balance_max: u32,
    pub fade_max: u32,
}

pub struct VolumeService {
    player: SharedPlayer,
}

impl VolumeService {
    pub fn new(player: SharedPlayer) -> Self {
        Self { player }
    }

    pub fn characteristics(&self) -> Characteristics {
        Characteristics {
            volume_max: VOLUME_MAX,
            volume_unity: VOLUME_MAX,
            volume_steps: VOLUME_MAX,
            volume_milli_db_per_step: MILLI_DB_PER_STEP,
            balance_max: 0,
            fade_max: 0,
        }
    }

    /// Current volume (0 while unknown)
    pub async fn volume(&self) -> u32 {
        self.player.lock().await.get_volume().unwrap_or(0)
    }

    pub async fn mute(&self) -> bool {
        self.volume().await == 0
    }

    pub async fn set_volume(&self, value: i32) -> Result<u32, VolumeError> {
        debug!("set_volume({})", value);
        let mut player = self.player.lock().await;
        player.set_volume(value, false).await?;
        Ok(player.get_volume().unwrap_or(0))
    }

    pub async fn set_mute(&self, on: bool) -> Result<u32, VolumeError> {
        debug!("set_mute({})", on);
        let mut player = self.player.lock().await;
        player.set_volume(if on { 0 } else { 1 }, true).await?;
        Ok(player.get_volume().unwrap_or(0))
    }

    pub async fn volume_inc(&self) -> Result<u32, VolumeError> {
        let mut player = self.player.lock().await;
        let current = player.get_volume().unwrap_or(0);
        player
            .set_volume((current + 1).min(VOLUME_MAX) as i32, false)
            .await?;
        Ok(player.get_volume().unwrap_or(0))
    }

    pub async fn volume_dec(&self) -> Result<u32, VolumeError> {
        let mut player = self.player.lock().await;
        let current = player.get_volume().unwrap_or(0);
        player
            .set_volume(current.saturating_sub(1) as i32, false)
            .await?;
        Ok(player.get_volume().unwrap_or(0))
    }

    pub fn volume_limit(&self) -> u32 {
        VOLUME_MAX
    }

    pub fn balance(&self) -> i32 {
        0
    }

    pub fn set_balance(&self, value: i32) -> Result<(), VolumeError> {
        if value != 0 {
            return Err(VolumeError::Unsupported(value));
        }
        Ok(())
    }

    pub fn fade(&self) -> i32 {
        0
    }

    pub fn set_fade(&self, value: i32) -> Result<(), VolumeError> {
        if value != 0 {
            return Err(VolumeError::Unsupported(value));
        }
        Ok(())
    }
}

#[async_trait]
impl StatefulService for VolumeService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn make_state(&self) -> StateMap {
        let volume = self.volume().await;
        let fixed = [
            ("VolumeMax", VOLUME_MAX.to_string()),
            ("VolumeLimit", VOLUME_MAX.to_string()),
            ("VolumeUnity", VOLUME_MAX.to_string()),
            ("VolumeSteps", VOLUME_MAX.to_string()),
            ("VolumeMilliDbPerStep", MILLI_DB_PER_STEP.to_string()),
            ("Balance", "0".to_string()),
            ("BalanceMax", "0".to_string()),
            ("Fade", "0".to_string()),
            ("FadeMax", "0".to_string()),
            ("Volume", volume.to_string()),
            ("Mute", if volume == 0 { "1" } else { "0" }.to_string()),
        ];
        fixed
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
