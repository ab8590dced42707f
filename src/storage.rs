//! Where uploaded configuration files and the "latest" aliases live.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// File operations needed by the deployment workflow. Names given to
/// [Storage::save] and the alias methods are relative to the storage's
/// folder, paths are the ones returned by [Storage::save].
pub trait Storage {
    /// Creates the folder if it doesn't exist yet
    fn ensure_directory(&self) -> io::Result<()>;

    /// Writes `content` under `safe_name`, returning the full path
    fn save(&self, content: &[u8], safe_name: &str) -> io::Result<PathBuf>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Creates the alias `alias_name` pointing at `target`. Must fail with
    /// [io::ErrorKind::AlreadyExists] if the alias is already there.
    fn make_alias(&self, target: &Path, alias_name: &str) -> io::Result<PathBuf>;

    fn remove_alias(&self, alias_name: &str) -> io::Result<()>;
}

/// [Storage] on a local folder, with symlinks as aliases
#[derive(Debug, Clone)]
pub struct FsStorage {
    folder: PathBuf,
}

impl FsStorage {
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        FsStorage {
            folder: folder.as_ref().to_owned(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

impl Storage for FsStorage {
    fn ensure_directory(&self) -> io::Result<()> {
        if !self.folder.is_dir() {
            log::debug!("storage: creating {}", self.folder.display());
            fs::create_dir_all(&self.folder)?;
        }
        Ok(())
    }

    fn save(&self, content: &[u8], safe_name: &str) -> io::Result<PathBuf> {
        self.ensure_directory()?;
        let path = self.folder.join(safe_name);
        fs::write(&path, content)?;
        log::debug!("storage: saved {} bytes to {}", content.len(), path.display());
        Ok(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        log::debug!("storage: removing {}", path.display());
        fs::remove_file(path)
    }

    fn make_alias(&self, target: &Path, alias_name: &str) -> io::Result<PathBuf> {
        let alias = self.folder.join(alias_name);
        // a link next to its target stays valid if the folder moves
        let link_target = match (target.parent(), target.file_name()) {
            (Some(parent), Some(name)) if parent == self.folder => Path::new(name),
            _ => target,
        };
        std::os::unix::fs::symlink(link_target, &alias)?;
        log::debug!(
            "storage: {} now points to {}",
            alias.display(),
            link_target.display()
        );
        Ok(alias)
    }

    fn remove_alias(&self, alias_name: &str) -> io::Result<()> {
        fs::remove_file(self.folder.join(alias_name))
    }
}

/// ASCII spelling of accented latin letters, `None` for anything else
fn fold_accent(c: char) -> Option<&'static str> {
    Some(match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ď' => "D",
        'ď' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ĥ' => "H",
        'ĥ' => "h",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => "i",
        'Ĵ' => "J",
        'ĵ' => "j",
        'Ķ' => "K",
        'ķ' => "k",
        'Ĺ' | 'Ļ' | 'Ľ' => "L",
        'ĺ' | 'ļ' | 'ľ' => "l",
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "N",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ō' | 'Ŏ' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ŏ' | 'ő' => "o",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'Ţ' | 'Ť' => "T",
        'ţ' | 'ť' => "t",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ŵ' => "W",
        'ŵ' => "w",
        'Ý' | 'Ŷ' | 'Ÿ' => "Y",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    })
}

/// Reduces an uploaded file name to something safe to use inside the
/// storage folder: ASCII letters, digits, `.`, `_` and `-` only, with
/// whitespace and path separators turned into `_`. Accented latin letters
/// lose their accent, other non-ASCII characters are dropped. The result
/// may be empty.
pub fn secure_filename(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for c in name.chars() {
        match fold_accent(c) {
            Some(ascii) => folded.push_str(ascii),
            None => folded.push(c),
        }
    }
    let cleaned: String = folded
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '_' | '-') || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join("_")
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_owned()
}
