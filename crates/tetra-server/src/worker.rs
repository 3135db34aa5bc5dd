//! Body of the `worker` subcommand: one mesh in on stdin, one grid out on
//! stdout. Runs without an async runtime.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use clap::Args;
use tetra_mesh::grid::encode_tetra_grid;
use tetra_mesh::tetrahedralize::{DEFAULT_EDGE_LENGTH_FAC, DEFAULT_OPTIMIZE};
use tetra_mesh::{CodecError, MeshingError, TetraOptions, Tetrahedralizer, codec};
use thiserror::Error;
use tracing::{debug, error};

/// `EX_DATAERR` from sysexits.h.
pub const EXIT_DATA_ERROR: u8 = 65;
/// `EX_IOERR` from sysexits.h.
pub const EXIT_IO_ERROR: u8 = 74;

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long, default_value_t = DEFAULT_EDGE_LENGTH_FAC)]
    pub edge_length_fac: f64,

    #[arg(long, default_value_t = DEFAULT_OPTIMIZE, action = clap::ArgAction::Set)]
    pub optimize: bool,
}

impl WorkerArgs {
    pub fn options(&self) -> TetraOptions {
        TetraOptions {
            edge_length_fac: self.edge_length_fac,
            optimize: self.optimize,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not decode input mesh: {0}")]
    Decode(#[from] CodecError),

    #[error("tetrahedralization failed: {0}")]
    Meshing(#[from] MeshingError),

    #[error("worker i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl WorkerError {
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Decode(_) | Self::Meshing(_) => EXIT_DATA_ERROR,
            Self::Io(_) => EXIT_IO_ERROR,
        }
    }
}

pub fn run<R, W>(
    mesher: &dyn Tetrahedralizer,
    options: TetraOptions,
    mut input: R,
    mut output: W,
) -> Result<(), WorkerError>
where
    R: Read,
    W: Write,
{
    let mut body = Vec::new();
    input.read_to_end(&mut body)?;
    let surface = codec::decode(&body)?;
    debug!(
        vertices = surface.vertices.len(),
        triangles = surface.triangles.len(),
        ?options,
        "worker received surface"
    );

    let grid = mesher.tetrahedralize(&surface, &options)?;
    output.write_all(&encode_tetra_grid(&grid))?;
    output.flush()?;
    Ok(())
}

/// Runs against the process's stdio and maps the outcome to an exit code.
pub fn main(mesher: &dyn Tetrahedralizer, args: &WorkerArgs) -> ExitCode {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    match run(mesher, args.options(), stdin, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_status())
        }
    }
}

#[cfg(test)]
mod tests {
    use tetra_mesh::demo::unit_cube;
    use tetra_mesh::grid::decode_tetra_grid;
    use tetra_mesh::{Mesh, StarTetrahedralizer, TetraOptions, codec};

    use super::{WorkerError, run};

    #[test]
    fn encoded_cube_becomes_grid() {
        let input = codec::encode(&unit_cube()).expect("encode");
        let mut output = Vec::new();
        run(
            &StarTetrahedralizer,
            TetraOptions::default(),
            input.as_slice(),
            &mut output,
        )
        .expect("worker should succeed");

        let grid = decode_tetra_grid(&output).expect("worker output should decode");
        assert!(!grid.tetrahedra.is_empty());
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let mut output = Vec::new();
        let err = run(
            &StarTetrahedralizer,
            TetraOptions::default(),
            &[1u8, 2, 3][..],
            &mut output,
        )
        .expect_err("three bytes are not a mesh");
        assert!(matches!(err, WorkerError::Decode(_)));
        assert!(output.is_empty());
    }

    #[test]
    fn empty_surface_is_a_meshing_error() {
        let input = codec::encode(&Mesh::empty()).expect("encode");
        let err = run(
            &StarTetrahedralizer,
            TetraOptions::default(),
            input.as_slice(),
            Vec::new(),
        )
        .expect_err("nothing to mesh");
        assert!(matches!(err, WorkerError::Meshing(_)));
        assert_eq!(err.exit_status(), 65);
    }
}
