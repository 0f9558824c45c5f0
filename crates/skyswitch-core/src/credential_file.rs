//! Shared credentials file adapter.
//!
//! Every write re-reads the file, patches one `[profile]` section and
//! atomically replaces the whole file. Unrelated sections, comments and
//! blank lines survive byte for byte.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::AwsCredentials;

const KEY_ACCESS_KEY_ID: &str = "aws_access_key_id";
const KEY_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const KEY_SESSION_TOKEN: &str = "aws_session_token";
const KEY_REGION: &str = "region";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    /// `None` for lines before the first header.
    name: Option<String>,
    /// Raw lines, including the header and any trailing blank lines.
    lines: Vec<String>,
}

impl Section {
    fn trailing_blank_lines(&self) -> usize {
        self.lines
            .iter()
            .rev()
            .take_while(|line| line.trim().is_empty())
            .count()
    }
}

fn section_header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn parse(contents: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        name: None,
        lines: Vec::new(),
    }];

    for line in contents.lines() {
        if let Some(name) = section_header(line) {
            sections.push(Section {
                name: Some(name.to_string()),
                lines: vec![line.to_string()],
            });
        } else if let Some(current) = sections.last_mut() {
            current.lines.push(line.to_string());
        }
    }

    sections
}

fn render(sections: &[Section]) -> String {
    let mut out = String::new();
    for line in sections.iter().flat_map(|s| s.lines.iter()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn section_lines(profile: &str, creds: &AwsCredentials, region: &str) -> Vec<String> {
    let mut lines = vec![
        format!("[{}]", profile),
        format!("{} = {}", KEY_ACCESS_KEY_ID, creds.access_key_id),
        format!("{} = {}", KEY_SECRET_ACCESS_KEY, creds.secret_access_key),
    ];
    if let Some(ref token) = creds.session_token {
        lines.push(format!("{} = {}", KEY_SESSION_TOKEN, token));
    }
    lines.push(format!("{} = {}", KEY_REGION, region));
    lines
}

/// Adapter over `~/.aws/credentials` (or any file in the same format).
/// Clone the surrounding `Arc`, not the adapter: the mutex is what keeps
/// concurrent writers from interleaving their read-modify-write cycles.
#[derive(Debug)]
pub struct CredentialFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace or insert the profile's section.
    pub fn write(&self, profile: &str, creds: &AwsCredentials, region: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sections = parse(&self.read_contents()?);
        let fresh = section_lines(profile, creds, region);

        match sections
            .iter()
            .position(|s| s.name.as_deref() == Some(profile))
        {
            Some(index) => {
                let blanks = sections[index].trailing_blank_lines();
                let mut lines = fresh;
                lines.extend(std::iter::repeat(String::new()).take(blanks));
                sections[index].lines = lines;
                // Later duplicates of the same profile would shadow nothing
                // but confuse readers; drop them.
                let mut seen = 0;
                sections.retain(|s| {
                    if s.name.as_deref() == Some(profile) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => {
                if let Some(last) = sections.last_mut() {
                    let has_content = last.lines.iter().any(|l| !l.trim().is_empty());
                    if has_content && last.trailing_blank_lines() == 0 {
                        last.lines.push(String::new());
                    }
                }
                sections.push(Section {
                    name: Some(profile.to_string()),
                    lines: fresh,
                });
            }
        }

        debug!(profile = profile, path = %self.path.display(), "Writing credential section");
        self.replace_contents(&render(&sections))
    }

    /// Delete the profile's section entirely. Missing sections are not an error.
    pub fn remove(&self, profile: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let contents = self.read_contents()?;
        let mut sections = parse(&contents);
        let before = sections.len();
        sections.retain(|s| s.name.as_deref() != Some(profile));

        if sections.len() == before {
            debug!(profile = profile, "No credential section to remove");
            return Ok(());
        }

        debug!(profile = profile, path = %self.path.display(), "Removing credential section");
        self.replace_contents(&render(&sections))
    }

    /// Key/value pairs of a section, if present.
    pub fn read(&self, profile: &str) -> Result<Option<BTreeMap<String, String>>> {
        let contents = self.read_contents()?;
        let section = parse(&contents)
            .into_iter()
            .find(|s| s.name.as_deref() == Some(profile));

        Ok(section.map(|s| {
            s.lines
                .iter()
                .skip(1)
                .filter_map(|line| {
                    let trimmed = line.trim();
                    if trimmed.starts_with('#') || trimmed.starts_with(';') {
                        return None;
                    }
                    trimmed
                        .split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                })
                .collect()
        }))
    }

    pub fn profiles(&self) -> Result<Vec<String>> {
        Ok(parse(&self.read_contents()?)
            .into_iter()
            .filter_map(|s| s.name)
            .collect())
    }

    fn read_contents(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::credential_file(&self.path, e)),
        }
    }

    fn replace_contents(&self, contents: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| Error::credential_file(&dir, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::credential_file(&dir, e))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::credential_file(tmp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::credential_file(tmp.path(), e))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| Error::credential_file(&self.path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn creds(id: &str, token: Option<&str>) -> AwsCredentials {
        AwsCredentials {
            access_key_id: id.to_string(),
            secret_access_key: format!("{}-secret", id),
            session_token: token.map(str::to_string),
            expiration: None,
        }
    }

    fn file_in(dir: &tempfile::TempDir) -> CredentialFile {
        CredentialFile::new(dir.path().join(".aws").join("credentials"))
    }

    #[test]
    fn test_write_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);

        file.write("default", &creds("AKIA1", Some("tok")), "eu-west-1").unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            contents,
            "[default]\naws_access_key_id = AKIA1\naws_secret_access_key = AKIA1-secret\n\
             aws_session_token = tok\nregion = eu-west-1\n"
        );
    }

    #[test]
    fn test_write_preserves_unrelated_sections() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        std::fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        let original = "# managed by hand\n[work]\naws_access_key_id = W\n\n[default]\naws_access_key_id = OLD\n\n[other]\nregion = us-west-2\n";
        std::fs::write(file.path(), original).unwrap();

        file.write("default", &creds("NEW", None), "us-east-1").unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            contents,
            "# managed by hand\n[work]\naws_access_key_id = W\n\n[default]\naws_access_key_id = NEW\n\
             aws_secret_access_key = NEW-secret\nregion = us-east-1\n\n[other]\nregion = us-west-2\n"
        );
    }

    #[test]
    fn test_remove_leaves_no_stub() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.write("a", &creds("A", None), "us-east-1").unwrap();
        file.write("b", &creds("B", None), "us-east-1").unwrap();

        file.remove("a").unwrap();

        assert_eq!(file.profiles().unwrap(), vec!["b".to_string()]);
        assert!(!std::fs::read_to_string(file.path()).unwrap().contains("[a]"));
        // Removing twice is fine
        file.remove("a").unwrap();
    }

    #[test]
    fn test_remove_then_write_restores_section() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.write("default", &creds("A", Some("t1")), "us-east-1").unwrap();
        let before = std::fs::read_to_string(file.path()).unwrap();

        file.remove("default").unwrap();
        assert_eq!(file.read("default").unwrap(), None);
        file.write("default", &creds("A", Some("t1")), "us-east-1").unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), before);
    }

    #[test]
    fn test_read_section_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.write("dev", &creds("D", Some("tok")), "ap-south-1").unwrap();

        let section = file.read("dev").unwrap().unwrap();
        assert_eq!(section.get("aws_access_key_id").map(String::as_str), Some("D"));
        assert_eq!(section.get("aws_session_token").map(String::as_str), Some("tok"));
        assert_eq!(section.get("region").map(String::as_str), Some("ap-south-1"));
    }

    #[test]
    fn test_concurrent_writers_keep_both_sections() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(file_in(&dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    let profile = format!("p{}", i);
                    file.write(&profile, &creds(&profile, None), "us-east-1").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut profiles = file.profiles().unwrap();
        profiles.sort();
        assert_eq!(profiles.len(), 8);
    }

    #[test]
    fn test_empty_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        std::fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        std::fs::write(file.path(), "").unwrap();

        assert!(file.profiles().unwrap().is_empty());
        file.remove("missing").unwrap();
        file.write("x", &creds("X", None), "us-east-1").unwrap();
        assert_eq!(file.profiles().unwrap(), vec!["x".to_string()]);
    }
}
