mod settings;

pub use settings::{Config, Settings, TargetSettings, ENV_EXECUTABLE, ENV_WORKING_DIR};
