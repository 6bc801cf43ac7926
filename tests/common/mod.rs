//! Shared fixtures for the integration tests.

use co2sweep::config::parse_setup;
use co2sweep::params::ParameterSet;
use std::path::Path;

pub const SETUP: &str = r#"
[Paths]
root = "/srv/sweep"
results = "results"

[Pre-Processing]
case_name = "GCS01"
file_basename = "UNISIM_I_D_ECLIPSE"
model_name = "unisim"

[Grid]
file_path = "benchmark/unisim/UNISIM_I_D_ECLIPSE.DATA"

[Fluid]
pres_ref = 10.0
temp_ref = 40.0
cp_rock = 4.35e-5
srw = 0.27
src = 0.2
pe = 5.0
XNaCl = 0.1
rho_h2o = 1000.0

["Initial Conditions"]
sw_0 = 1.0

["Boundary Conditions"]
type = "pressure"

[Wells]
CO2_inj = 1.5e9

[Schedule]
injection_time = 10
migration_time = 100
injection_timesteps = 10
migration_timesteps = 10

[Execution]
solver_bin = "octave"

[SimNums]
"#;

/// Setup with case `GCS01` and every section filled in.
pub fn base() -> ParameterSet {
    parse_setup(SETUP, Path::new("setup.toml")).unwrap()
}
