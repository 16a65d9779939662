use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub(crate) const LOCKFILE_NAME: &str = "LOCK";

const DATAFILE_PREFIX: &str = "bitcask-";
const DATAFILE_EXT: &str = ".data";

/// Path of the data file with the given id, e.g. `bitcask-00000000deadbeef.data`.
/// Ids are zero-padded to 16 hex digits so that ASCII order over the names
/// equals numeric order over the ids.
pub(crate) fn datafile_name<P>(dir: P, id: u64) -> PathBuf
where
    P: AsRef<Path>,
{
    dir.as_ref().join(format!("{DATAFILE_PREFIX}{id:016x}{DATAFILE_EXT}"))
}

/// Parses the id out of a data file name. Returns `None` for anything that
/// does not match `bitcask-<16 lowercase hex>.data` exactly.
pub(crate) fn parse_file_id(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(DATAFILE_PREFIX)?.strip_suffix(DATAFILE_EXT)?;
    if hex.len() != 16 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Ids of all data files in the directory, in ascending order.
pub(crate) fn sorted_file_ids<P>(dir: P) -> io::Result<Vec<u64>>
where
    P: AsRef<Path>,
{
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(parse_file_id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datafile_names_roundtrip_through_parse() {
        for id in [0, 1, 0xdead_beef, u64::MAX] {
            let path = datafile_name("/anywhere", id);
            let name = path.file_name().unwrap().to_str().unwrap();
            assert_eq!(parse_file_id(name), Some(id));
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_file_id("LOCK"), None);
        assert_eq!(parse_file_id("bitcask-0000000000000000.data.hint"), None);
        assert_eq!(parse_file_id("bitcask-0000000000000000.dat"), None);
        assert_eq!(parse_file_id("bitcask-00000000.data"), None);
        assert_eq!(parse_file_id("bitcask-00000000DEADBEEF.data"), None);
        assert_eq!(parse_file_id("bitcask-000000000000000g.data"), None);
    }

    #[test]
    fn ascii_order_matches_id_order() {
        let mut ids = vec![0u64, 1, 0xffff_ffff, 1 << 32, u64::MAX];
        let mut names: Vec<_> = ids
            .iter()
            .map(|&id| datafile_name("", id).to_str().unwrap().to_owned())
            .collect();
        names.sort();
        ids.sort_unstable();
        let parsed: Vec<_> = names
            .iter()
            .map(|n| parse_file_id(n).unwrap())
            .collect();
        assert_eq!(parsed, ids);
    }

    #[test]
    fn sorted_file_ids_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "bitcask-0000000000000002.data",
            "bitcask-0000000000000000.data",
            "bitcask-0000000000000000.data.hint",
            "LOCK",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(sorted_file_ids(dir.path()).unwrap(), vec![0, 2]);
    }
}
