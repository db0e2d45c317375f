use crate::error::AllocatorError;
use candle_core::Device;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

pub fn get_device(use_cuda: bool) -> Device {
    if use_cuda {
        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA device 0");
                    return device;
                }
                Err(e) => {
                    warn!("Failed to initialize CUDA: {}. Falling back to CPU.", e);
                }
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("--cuda flag set but binary was compiled without the 'cuda' feature. Falling back to CPU.");
        }
    }

    #[cfg(feature = "mkl")]
    info!("Using CPU device with Intel MKL BLAS acceleration");

    #[cfg(not(feature = "mkl"))]
    info!("Using CPU device");

    Device::Cpu
}

/// Default location of the per-exchange CSV price files: `$HOME/stock-data/data/data`.
pub fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join("stock-data").join("data").join("data")
}

pub const EPOCHS: usize = 50;
pub const LEARNING_RATE: f64 = 1e-3;
pub const HIDDEN_DIM: usize = 64;
/// Upper bound on the global L2 norm of the gradient before each optimizer step.
pub const MAX_GRAD_NORM: f64 = 1.0;
/// Floor applied to the portfolio standard deviation in the Sharpe ratio.
pub const STD_FLOOR: f64 = 1e-8;

/// Hyperparameters and placement for one training run.
///
/// Everything the trainer needs is carried here explicitly, including the
/// device, so runs never depend on process-wide state.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub hidden_width: usize,
    pub max_grad_norm: f64,
    pub std_floor: f64,
    /// Fixes parameter initialization. `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub device: Device,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: EPOCHS,
            learning_rate: LEARNING_RATE,
            hidden_width: HIDDEN_DIM,
            max_grad_norm: MAX_GRAD_NORM,
            std_floor: STD_FLOOR,
            seed: None,
            device: Device::Cpu,
        }
    }
}

impl TrainConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn validate(&self) -> Result<(), AllocatorError> {
        if self.epochs == 0 {
            return Err(AllocatorError::InvalidConfig(
                "epochs must be at least 1".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(AllocatorError::InvalidConfig(format!(
                "learning_rate must be a positive finite number, got {}",
                self.learning_rate
            )));
        }
        if self.hidden_width == 0 {
            return Err(AllocatorError::InvalidConfig(
                "hidden_width must be at least 1".to_string(),
            ));
        }
        if !self.max_grad_norm.is_finite() || self.max_grad_norm <= 0.0 {
            return Err(AllocatorError::InvalidConfig(format!(
                "max_grad_norm must be a positive finite number, got {}",
                self.max_grad_norm
            )));
        }
        if !self.std_floor.is_finite() || self.std_floor <= 0.0 {
            return Err(AllocatorError::InvalidConfig(format!(
                "std_floor must be a positive finite number, got {}",
                self.std_floor
            )));
        }
        Ok(())
    }
}
