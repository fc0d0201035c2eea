// Copyright 2025 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Store configurations
//!
//! Store configurations size the buffers used to capture response bodies:
//! * The frame index hint used when the response declares no length
//! * Bytes per frame
//! * The maximum size of a single captured body

use crate::frame::{DEFAULT_FRAME_SIZE, MAXIMUM_FRAMES};
use larder_error::{Context, Error, ErrorType::*, OrErr, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fs;

/// The store configuration
///
/// Configuration files are YAML. Missing keys take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConf {
    /// Size hint used when the response has no positive `Content-Length`
    pub initial_buffer_min_size: u64,
    /// Upper bound of the size hint taken from `Content-Length`
    pub initial_buffer_max_size: u64,
    /// Bytes per frame
    pub frame_size: usize,
    /// Upper bound of the frame index pre-allocation
    pub max_frames: usize,
    /// Bodies larger than this are not cached. `None` for no limit.
    pub max_capture_size: Option<u64>,
}

impl Default for StoreConf {
    fn default() -> Self {
        StoreConf {
            initial_buffer_min_size: 256_000,
            initial_buffer_max_size: 1_000_000,
            frame_size: DEFAULT_FRAME_SIZE,
            max_frames: MAXIMUM_FRAMES,
            max_capture_size: None,
        }
    }
}

impl StoreConf {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str).err_context(|| format!("conf file {path}"))
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: StoreConf = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).or_err(InternalError, "Unable to serialize conf")
    }

    pub fn validate(self) -> Result<Self> {
        if self.frame_size == 0 {
            return Error::e_explain(InvalidConfig, "frame_size must be positive");
        }
        if self.initial_buffer_min_size > self.initial_buffer_max_size {
            return Error::e_explain(
                InvalidConfig,
                format!(
                    "initial_buffer_min_size {} is larger than initial_buffer_max_size {}",
                    self.initial_buffer_min_size, self.initial_buffer_max_size
                ),
            );
        }
        if self.max_capture_size == Some(0) {
            return Error::e_explain(InvalidConfig, "max_capture_size must be positive");
        }
        Ok(self)
    }

    /// The expected body size for a response declaring `content_length`.
    pub fn initial_buffer_hint(&self, content_length: Option<i64>) -> u64 {
        match content_length {
            Some(len) if len > 0 => (len as u64).min(self.initial_buffer_max_size),
            _ => self.initial_buffer_min_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn not_a_test_i_cannot_write_yaml_by_hand() {
        init_log();
        let conf = StoreConf {
            max_capture_size: Some(10_000_000),
            ..Default::default()
        };
        // cargo test -- --nocapture not_a_test_i_cannot_write_yaml_by_hand
        println!("{}", conf.to_yaml().unwrap());
    }

    #[test]
    fn test_load_str() {
        init_log();
        let conf_str = r#"
---
frame_size: 4096
max_capture_size: 1048576
        "#
        .to_string();
        let conf = StoreConf::from_yaml(&conf_str).unwrap();
        assert_eq!(4096, conf.frame_size);
        assert_eq!(Some(1048576), conf.max_capture_size);
        assert_eq!(256_000, conf.initial_buffer_min_size);
        assert_eq!(MAXIMUM_FRAMES, conf.max_frames);
    }

    #[test]
    fn test_default() {
        init_log();
        let conf = StoreConf::from_yaml("---\n{}").unwrap();
        assert_eq!(conf, StoreConf::default());
        assert_eq!(DEFAULT_FRAME_SIZE, conf.frame_size);
        assert_eq!(1_000_000, conf.initial_buffer_max_size);
        assert_eq!(None, conf.max_capture_size);
    }

    #[test]
    fn test_yaml_round_trip() {
        let conf = StoreConf {
            frame_size: 10,
            ..Default::default()
        };
        let yaml = conf.to_yaml().unwrap();
        assert_eq!(StoreConf::from_yaml(&yaml).unwrap(), conf);
    }

    #[test]
    fn test_load_file() {
        init_log();
        let path = std::env::temp_dir()
            .join(format!("larder-conf-{}.yaml", std::process::id()))
            .to_string_lossy()
            .to_string();
        fs::write(&path, "initial_buffer_min_size: 1024\n").unwrap();
        let conf = StoreConf::load_from_yaml(&path).unwrap();
        assert_eq!(1024, conf.initial_buffer_min_size);
        fs::remove_file(&path).unwrap();

        let e = StoreConf::load_from_yaml(&path).unwrap_err();
        assert_eq!(e.etype(), &ReadError);
    }

    #[test]
    fn test_load_invalid_file() {
        init_log();
        let path = std::env::temp_dir()
            .join(format!("larder-bad-conf-{}.yaml", std::process::id()))
            .to_string_lossy()
            .to_string();
        fs::write(&path, "frame_size: 0\n").unwrap();
        let e = StoreConf::load_from_yaml(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert_eq!(e.etype(), &InvalidConfig);
        assert_eq!(e.root_etype(), &InvalidConfig);
        let msg = e.to_string();
        assert!(msg.contains(&path), "{msg}");
        assert!(msg.contains("frame_size must be positive"), "{msg}");
    }

    #[test]
    fn test_invalid() {
        init_log();
        let e = StoreConf::from_yaml("frame_size: 0").unwrap_err();
        assert_eq!(e.etype(), &InvalidConfig);
        let e = StoreConf::from_yaml("initial_buffer_min_size: 5\ninitial_buffer_max_size: 4")
            .unwrap_err();
        assert_eq!(e.etype(), &InvalidConfig);
        let e = StoreConf::from_yaml("max_capture_size: 0").unwrap_err();
        assert_eq!(e.etype(), &InvalidConfig);
        let e = StoreConf::from_yaml("frame_size: [1, 2]").unwrap_err();
        assert_eq!(e.etype(), &ReadError);
    }

    #[test]
    fn test_initial_buffer_hint() {
        let conf = StoreConf::default();
        assert_eq!(conf.initial_buffer_hint(None), 256_000);
        assert_eq!(conf.initial_buffer_hint(Some(0)), 256_000);
        assert_eq!(conf.initial_buffer_hint(Some(-1)), 256_000);
        assert_eq!(conf.initial_buffer_hint(Some(10)), 10);
        assert_eq!(conf.initial_buffer_hint(Some(5_000_000)), 1_000_000);
    }
}
