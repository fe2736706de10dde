// target.rs — Device descriptor
//
// What the pipeline needs to know about the device: lane count per warp and
// shared-memory capacity per block.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub warp_size: u32,
    /// Shared memory available to one thread block, in bytes.
    pub max_shared_bytes: u64,
}

impl Target {
    /// A CUDA device of compute capability `arch` (e.g. 80 for sm_80).
    ///
    /// Capacities are the opt-in per-block maximum of each generation.
    pub fn cuda(arch: u32) -> Self {
        let max_shared_bytes = match arch {
            90.. => 232_448,
            86 | 89 => 101_376,
            80.. => 163_840,
            75..=79 => 65_536,
            70..=74 => 98_304,
            _ => 49_152,
        };
        Target {
            name: format!("sm_{arch}"),
            warp_size: 32,
            max_shared_bytes,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::cuda(80)
    }
}
