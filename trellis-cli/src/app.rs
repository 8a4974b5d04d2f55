use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use trellis_core::{decode_or_empty, BlockKind, FieldError, FormSchema, GridItem};
use trellis_sync::{EngineConfig, ReferenceServer, SyncEngine, Transport, TransportError};
use trellis_view::{Binding, BindingError, Intent};

type CliBinding = Binding<Box<dyn Transport>>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("No block {0} in this layout")]
    UnknownBlock(i64),

    #[error("No section {0} in this layout")]
    UnknownSection(i64),

    #[error("Block kind `{0}` has no structured form, use set-attrs")]
    NoForm(BlockKind),

    #[error("Block kind `{0}` is not a grid")]
    NotAGrid(BlockKind),
}

#[derive(Debug, Parser)]
#[command(name = "trellis", version, about = "Section/block layout builder client")]
#[command(after_help = "Environment variables:\n  \
    TRELLIS_BASE_URL    Origin of the layout store\n  \
    TRELLIS_LOCATION    Builder page location (home or column builder)\n  \
    RUST_LOG            Log filter, default `info`")]
pub struct Cli {
    #[command(flatten)]
    pub args: ConnectArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Origin of the layout store
    #[arg(long, value_name = "URL", env = "TRELLIS_BASE_URL")]
    #[arg(default_value_t = EngineConfig::default().base_url)]
    pub base_url: String,

    /// Builder page location, decides between the home and a column layout
    #[arg(long, value_name = "PATH", env = "TRELLIS_LOCATION")]
    #[arg(default_value_t = EngineConfig::default().location)]
    pub location: String,

    /// Use a seeded in-memory store instead of HTTP
    #[arg(long)]
    pub demo: bool,
}

impl ConnectArgs {
    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            base_url: self.base_url.clone(),
            location: self.location.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the layout outline
    Show,
    /// Append a section
    AddSection {
        #[arg(long)]
        title: Option<String>,
    },
    /// Add a block with its default attributes
    AddBlock { section_id: i64, kind: String },
    /// Add a block to the first section, creating one if needed
    PaletteAdd { kind: String },
    DeleteBlock { block_id: i64 },
    RenameSection { section_id: i64, title: String },
    /// Enable a disabled section or disable an enabled one
    ToggleSection { section_id: i64 },
    /// Move the section at position FROM to position TO
    MoveSection { from: usize, to: usize },
    /// Move a block within its section by position
    MoveBlock {
        section_id: i64,
        from: usize,
        to: usize,
    },
    /// Replace a block's attribute JSON verbatim
    SetAttrs { block_id: i64, json: String },
    /// Edit form fields of a block, e.g. `--set title=Welcome`
    Edit {
        block_id: i64,
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },
    /// Store one grid row; cells follow the grid's column order
    GridSet {
        block_id: i64,
        index: usize,
        cells: Vec<String>,
    },
    GridDelete { block_id: i64, index: usize },
    Publish,
    /// Print the preview URL
    Preview,
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{input}`"))
}

fn block_kind(binding: &CliBinding, block_id: i64) -> Result<BlockKind, CliError> {
    binding
        .view()
        .block(block_id)
        .map(|block| block.kind.clone())
        .ok_or(CliError::UnknownBlock(block_id))
}

impl Command {
    /// Resolve the command into an intent against the loaded view. Gesture
    /// commands rearrange the view first, like a drag would.
    fn into_intent(self, binding: &mut CliBinding) -> Result<Option<Intent>, CliError> {
        let intent = match self {
            Self::Show | Self::Preview => return Ok(None),
            Self::AddSection { title } => Intent::AddSection { title },
            Self::AddBlock { section_id, kind } => Intent::AddBlock {
                section_id,
                kind: BlockKind::parse(&kind),
            },
            Self::PaletteAdd { kind } => Intent::PaletteAdd {
                kind: BlockKind::parse(&kind),
            },
            Self::DeleteBlock { block_id } => Intent::DeleteBlock { block_id },
            Self::RenameSection { section_id, title } => Intent::UpdateSection {
                section_id,
                title: Some(title),
                enabled: None,
            },
            Self::ToggleSection { section_id } => {
                let section = binding
                    .view()
                    .section(section_id)
                    .ok_or(CliError::UnknownSection(section_id))?;
                Intent::UpdateSection {
                    section_id,
                    title: None,
                    enabled: Some(!section.enabled),
                }
            }
            Self::MoveSection { from, to } => {
                binding.view_mut().move_section(from, to)?;
                Intent::DragSectionsEnd
            }
            Self::MoveBlock {
                section_id,
                from,
                to,
            } => {
                binding.view_mut().move_block(section_id, from, to)?;
                Intent::DragBlocksEnd { section_id }
            }
            Self::SetAttrs { block_id, json } => Intent::SaveAttributes {
                block_id,
                raw: json,
            },
            Self::Edit { block_id, fields } => {
                let kind = block_kind(binding, block_id)?;
                let raw = binding
                    .view()
                    .block(block_id)
                    .map(|block| block.raw_attributes.clone())
                    .unwrap_or_default();
                let mut record =
                    decode_or_empty(&kind, &raw).ok_or_else(|| CliError::NoForm(kind.clone()))?;
                for (name, value) in &fields {
                    record.set_field(name, value)?;
                }
                Intent::SaveForm { block_id, record }
            }
            Self::GridSet {
                block_id,
                index,
                cells,
            } => {
                let kind = block_kind(binding, block_id)?;
                let Some(FormSchema::Grid(columns)) = kind.form_schema() else {
                    return Err(CliError::NotAGrid(kind));
                };
                let cells: Vec<&str> = cells.iter().map(String::as_str).collect();
                Intent::SaveGridItem {
                    block_id,
                    index,
                    item: GridItem::from_cells(columns, &cells),
                }
            }
            Self::GridDelete { block_id, index } => Intent::DeleteGridItem { block_id, index },
            Self::Publish => Intent::Publish,
        };
        Ok(Some(intent))
    }
}

impl Cli {
    pub async fn run(self) -> Result<(), CliError> {
        let config = self.args.config();
        let transport: Box<dyn Transport> = if self.args.demo {
            log::info!("Using the in-memory demo store");
            Box::new(ReferenceServer::seeded_demo())
        } else {
            Box::new(config.http_transport()?)
        };
        let engine = SyncEngine::with_config(transport, &config);
        log::info!("Editing the {} layout", engine.scope());

        let mut binding = Binding::new(engine);
        binding.dispatch(Intent::Refresh).await?;

        let show_preview = matches!(self.command, Command::Preview);
        let outcome = match self.command.into_intent(&mut binding)? {
            Some(intent) => binding.dispatch(intent).await,
            None => Ok(()),
        };

        for event in binding.drain_events() {
            log::debug!("{event:?}");
        }
        for notice in binding.take_notices() {
            if !notice.is_error() {
                println!("{}", notice.text());
            }
        }
        outcome?;

        if show_preview {
            println!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                binding.preview_path()
            );
        } else {
            print!("{}", binding.view().to_text());
        }
        Ok(())
    }
}
