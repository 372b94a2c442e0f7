use anyhow::Result;

#[cfg(feature = "cli")]
mod main {
    use super::*;
    use anyhow::bail;
    use clap::{Parser, Subcommand};
    use cubemesh::{
        ChunkWorld, CubeTemplate, MeshingConfig, RecordingMeshConsumer, Viewer, VoxelVolume,
        io::{save_data_as_binary, write_ron_file},
    };
    use nalgebra::{Point3, Vector3};
    use std::path::PathBuf;

    #[derive(Debug, Parser)]
    #[command(about = "Cube-template voxel mesher", long_about = None)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Debug, Subcommand)]
    enum Command {
        /// Mesh a voxel volume as seen from a viewer
        Mesh {
            /// Path to the `.caw` cube template
            #[arg(short, long)]
            template: PathBuf,
            /// Path to the raw volume file with one byte per voxel
            #[arg(short, long)]
            volume: PathBuf,
            /// Path to RON configuration file to use
            #[arg(short, long)]
            config: Option<PathBuf>,
            /// Viewer position as `x,y,z` in voxel units
            #[arg(long, value_parser = parse_vector, default_value = "0,0,0")]
            viewer_position: [f32; 3],
            /// Viewing direction as `x,y,z`
            #[arg(long, value_parser = parse_vector, default_value = "0,0,1")]
            viewer_direction: [f32; 3],
            /// Interest point as `x,y,z`, can be given multiple times
            #[arg(short, long = "interest", value_parser = parse_vector)]
            interest_points: Vec<[f32; 3]>,
            /// Directory to write the vertex and index buffer of each chunk
            /// mesh to
            #[arg(short, long)]
            output_dir: Option<PathBuf>,
        },
        /// Write the template for a plain unit cube
        GenerateTemplate {
            /// Path where the `.caw` file should be written
            #[arg(short, long)]
            output_path: PathBuf,
            /// Overwrite any existing file at the given path
            #[arg(short, long)]
            force_overwrite: bool,
        },
        /// Generate the default RON configuration file
        GenerateConfig {
            /// Path where the file should be written
            #[arg(short, long)]
            output_path: PathBuf,
            /// Overwrite any existing file at the given path
            #[arg(short, long)]
            force_overwrite: bool,
        },
    }

    fn parse_vector(value: &str) -> Result<[f32; 3], String> {
        let components = value
            .split(',')
            .map(|component| component.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("Invalid component in `{value}`: {err}"))?;
        <[f32; 3]>::try_from(components)
            .map_err(|components| format!("Expected 3 components, got {}", components.len()))
    }

    fn mesh(
        template: PathBuf,
        volume: PathBuf,
        config: Option<PathBuf>,
        viewer_position: [f32; 3],
        viewer_direction: [f32; 3],
        interest_points: Vec<[f32; 3]>,
        output_dir: Option<PathBuf>,
    ) -> Result<()> {
        let config = match config {
            Some(file_path) => MeshingConfig::from_ron_file(file_path)?,
            None => MeshingConfig::default(),
        };
        let template = CubeTemplate::read_from_file(template)?;
        let volume = VoxelVolume::read_raw_file(volume)?;
        let viewer = Viewer::new(
            Point3::from(viewer_position),
            Vector3::from(viewer_direction),
        );

        let mut world = ChunkWorld::new(
            &config,
            template,
            volume,
            RecordingMeshConsumer::new(),
            viewer,
        )?;
        for point in interest_points {
            world.add_interest_point(Point3::from(point))?;
        }
        let stats = world.rebuild_blocking()?;

        println!(
            "{} top-level chunks refreshed, {} culled, {} meshes built with {} vertices",
            stats.roots_refreshed,
            stats.roots_culled,
            stats.refresh.meshes_built,
            stats.refresh.vertices_built
        );

        if let Some(output_dir) = output_dir {
            world.with_octree_and_consumer(|_, consumer| -> Result<()> {
                let mut chunk_ids = consumer.live_chunk_ids();
                chunk_ids.sort();
                for chunk_id in chunk_ids {
                    let Some(recorded) = consumer.live_mesh(chunk_id) else {
                        continue;
                    };
                    let [i, j, k] = recorded.placement.offset;
                    let stem = format!("chunk_L{}_{i}_{j}_{k}", recorded.placement.level);
                    save_data_as_binary(
                        output_dir.join(format!("{stem}.vertices")),
                        recorded.mesh.vertex_bytes(),
                    )?;
                    save_data_as_binary(
                        output_dir.join(format!("{stem}.indices")),
                        recorded.mesh.index_bytes(),
                    )?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn main() -> Result<()> {
        env_logger::init();

        let cli = Cli::parse();

        match cli.command {
            Command::Mesh {
                template,
                volume,
                config,
                viewer_position,
                viewer_direction,
                interest_points,
                output_dir,
            } => mesh(
                template,
                volume,
                config,
                viewer_position,
                viewer_direction,
                interest_points,
                output_dir,
            ),
            Command::GenerateTemplate {
                output_path,
                force_overwrite,
            } => {
                if !force_overwrite && output_path.exists() {
                    bail!("File {} already exists", output_path.display());
                }
                CubeTemplate::unit_cube().write_to_file(output_path)
            }
            Command::GenerateConfig {
                output_path,
                force_overwrite,
            } => {
                if !force_overwrite && output_path.exists() {
                    bail!("File {} already exists", output_path.display());
                }
                let config = MeshingConfig::default();
                write_ron_file(&config, output_path)
            }
        }
    }
}

#[cfg(not(feature = "cli"))]
mod main {
    use super::*;

    pub fn main() -> Result<()> {
        anyhow::bail!("This binary requires the `cli` feature to be enabled.")
    }
}

fn main() -> Result<()> {
    main::main()
}
