//! Level persistence: one gzip-compressed NBT document per level.
//!
//! Each level is saved as `<dir>/<name>.lvl` holding its dimensions and the
//! packed block array (one NBT long per cell, in grid index order). The
//! cached physics bit is not trusted on load: building a `Level` from the
//! grid recomputes it and rebuilds the physics set.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use fastnbt::LongArray;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use cubeworld_engine::world::{Block, Dimensions, VoxelGrid};

/// Bumped whenever the document layout changes.
const FORMAT_VERSION: i32 = 1;

const EXTENSION: &str = "lvl";

#[derive(Serialize, Deserialize, Debug)]
struct LevelNbt {
    #[serde(rename = "FormatVersion")]
    format_version: i32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Width")]
    width: i32,
    #[serde(rename = "Height")]
    height: i32,
    #[serde(rename = "Depth")]
    depth: i32,
    #[serde(rename = "Blocks")]
    blocks: LongArray,
}

/// Path of the save file for level `name`. Names are plain file stems.
pub fn level_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        bail!("invalid level name {:?}", name);
    }
    Ok(dir.join(format!("{}.{}", name, EXTENSION)))
}

/// Write `grid` as level `name` under `dir`. Returns the compressed size.
///
/// The document is written to a temporary file first and renamed into place,
/// so a crash mid-save leaves the previous save intact.
pub fn save_grid(dir: &Path, name: &str, grid: &VoxelGrid) -> Result<usize> {
    let start = Instant::now();
    let path = level_path(dir, name)?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let dims = grid.dims();
    let nbt = LevelNbt {
        format_version: FORMAT_VERSION,
        name: name.to_string(),
        width: dims.width.into(),
        height: dims.height.into(),
        depth: dims.depth.into(),
        blocks: LongArray::new(
            grid.blocks()
                .iter()
                .map(|b| b.with_physics(false).raw() as i64)
                .collect(),
        ),
    };
    let bytes = fastnbt::to_bytes(&nbt).with_context(|| format!("serializing level '{}'", name))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes)?;
    let compressed = encoder.finish()?;

    let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
    fs::write(&tmp, &compressed).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;

    tracing::info!(
        "Level '{}' saved: {} cells, {} bytes ({:.2?})",
        name,
        grid.len(),
        compressed.len(),
        start.elapsed()
    );
    Ok(compressed.len())
}

/// Read level `name` from `dir`. `Ok(None)` if it was never saved.
pub fn load_grid(dir: &Path, name: &str) -> Result<Option<VoxelGrid>> {
    let path = level_path(dir, name)?;
    if !path.is_file() {
        return Ok(None);
    }
    let start = Instant::now();

    let file = fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    let nbt: LevelNbt =
        fastnbt::from_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))?;

    if nbt.format_version != FORMAT_VERSION {
        bail!(
            "{}: unsupported format version {}",
            path.display(),
            nbt.format_version
        );
    }
    let dims = Dimensions::new(
        axis(nbt.width, "Width")?,
        axis(nbt.height, "Height")?,
        axis(nbt.depth, "Depth")?,
    );
    let blocks: Vec<Block> = nbt
        .blocks
        .iter()
        .map(|&raw| Block::from_raw(raw as u64).with_physics(false))
        .collect();
    let grid = VoxelGrid::from_blocks(dims, blocks)
        .with_context(|| format!("rebuilding grid from {}", path.display()))?;

    tracing::info!(
        "Level '{}' loaded: {}x{}x{} ({:.2?})",
        name,
        dims.width,
        dims.height,
        dims.depth,
        start.elapsed()
    );
    Ok(Some(grid))
}

fn axis(value: i32, field: &str) -> Result<u16> {
    u16::try_from(value).with_context(|| format!("{} out of range: {}", field, value))
}

/// Names of all saved levels in `dir`, sorted.
pub fn saved_levels(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubeworld_engine::world::{BlockId, BlockPos, OwnerId};

    fn tmp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cubeworld_persistence_{}", tag));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn level_names_are_plain_stems() {
        let dir = Path::new("/tmp");
        assert!(level_path(dir, "main").is_ok());
        assert!(level_path(dir, "build-2_b").is_ok());
        assert!(level_path(dir, "").is_err());
        assert!(level_path(dir, "../etc/passwd").is_err());
        assert!(level_path(dir, "a.b").is_err());
    }

    #[test]
    fn missing_level_is_none() {
        let dir = tmp_dir("missing");
        assert!(load_grid(&dir, "nowhere").unwrap().is_none());
        assert!(saved_levels(&dir).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let dir = tmp_dir("roundtrip");
        let dims = Dimensions::new(5, 4, 3);
        let mut grid = VoxelGrid::new(dims).unwrap();
        let special = Block::new(BlockId(12), 0x1234)
            .with_owner(OwnerId(77))
            .with_fixed(true)
            .with_touched(true)
            .with_physics(true);
        grid.set_at(BlockPos::new(4, 3, 2), special);
        grid.fill_layers(0..1, Block::new(BlockId(7), 0));

        save_grid(&dir, "small", &grid).unwrap();
        let loaded = load_grid(&dir, "small").unwrap().unwrap();

        assert_eq!(loaded.dims(), dims);
        let back = loaded.get_at(BlockPos::new(4, 3, 2)).unwrap();
        assert_eq!(back, special.with_physics(false));
        assert_eq!(back.owner(), OwnerId(77));
        assert!(back.is_fixed());
        assert_eq!(loaded.get_at(BlockPos::new(0, 0, 0)).unwrap().kind(), BlockId(7));
        assert_eq!(loaded.get_at(BlockPos::new(0, 1, 0)).unwrap(), Block::AIR);
        assert_eq!(saved_levels(&dir).unwrap(), vec!["small".to_string()]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn overwriting_replaces_the_previous_save() {
        let dir = tmp_dir("overwrite");
        let dims = Dimensions::new(2, 2, 2);
        let mut grid = VoxelGrid::new(dims).unwrap();
        save_grid(&dir, "lvl", &grid).unwrap();
        grid.set_at(BlockPos::new(1, 1, 1), Block::new(BlockId(1), 0));
        save_grid(&dir, "lvl", &grid).unwrap();

        let loaded = load_grid(&dir, "lvl").unwrap().unwrap();
        assert_eq!(loaded.get_at(BlockPos::new(1, 1, 1)).unwrap().kind(), BlockId(1));
        assert_eq!(saved_levels(&dir).unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tmp_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(level_path(&dir, "bad").unwrap(), b"not gzip at all").unwrap();
        assert!(load_grid(&dir, "bad").is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
