//! Stratumfile loader.
//!
//! Parses the YAML build description and flattens every multi-form
//! directive into the canonical [`Layer`] representation. Nothing outside
//! this module sees the raw input shapes.
//!
//! ```yaml
//! base:
//!   from:
//!     type: docker
//!     url: docker://centos:latest
//!   import:
//!     - path: app.tar.gz
//!       hash: 9f86d081...
//!     - https://example.com/config.json
//!   run: |
//!     tar xf /stratum/app.tar.gz -C /opt
//!   entrypoint: /opt/app/bin/start --foreground
//!   binds:
//!     - /var/cache/dnf -> /var/cache/dnf
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StratumError};
use crate::layer::{is_url, BindMount, ImageSource, ImportSpec, Layer};

/// A directive that may be written as a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Directive {
    Line(String),
    List(Vec<String>),
}

impl Directive {
    /// Each string becomes one entry; a single string stays whole.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Directive::Line(line) => vec![line],
            Directive::List(lines) => lines,
        }
    }

    /// A single string is shell-split into argv; a list is taken verbatim.
    pub fn into_argv(self) -> std::result::Result<Vec<String>, String> {
        match self {
            Directive::Line(line) => {
                shlex::split(&line).ok_or_else(|| format!("cannot shell-split '{}'", line))
            }
            Directive::List(args) => Ok(args),
        }
    }
}

/// One import as written: a bare path or a `{path, hash}` map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawImport {
    Path(String),
    Map {
        path: String,
        #[serde(default)]
        hash: Option<String>,
    },
}

/// The import directive: a single import or a list of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawImports {
    One(RawImport),
    Many(Vec<RawImport>),
}

impl RawImports {
    fn into_vec(self) -> Vec<RawImport> {
        match self {
            RawImports::One(one) => vec![one],
            RawImports::Many(many) => many,
        }
    }
}

/// A layer exactly as it appears in the YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawLayer {
    pub from: Option<ImageSource>,
    pub import: Option<RawImports>,
    pub run: Option<Directive>,
    pub cmd: Option<Directive>,
    pub entrypoint: Option<Directive>,
    pub full_command: Option<Directive>,
    pub build_env_passthrough: Vec<String>,
    pub build_env: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub generate_labels: Option<Directive>,
    pub working_dir: String,
    pub build_only: bool,
    pub binds: Option<Directive>,
    pub runtime_user: String,
}

impl RawLayer {
    /// Flatten into a [`Layer`], resolving relative paths against `reference_dir`.
    pub fn normalize(self, name: &str, reference_dir: &Path) -> Result<Layer> {
        let invalid = |message: String| StratumError::InvalidLayer {
            layer: name.to_string(),
            message,
        };

        let import = self
            .import
            .map(RawImports::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|raw| {
                let (path, hash) = match raw {
                    RawImport::Path(path) => (path, None),
                    RawImport::Map { path, hash } => (path, hash.filter(|h| !h.is_empty())),
                };
                ImportSpec {
                    path: absolutize(&path, reference_dir),
                    hash: hash.map(|h| h.to_lowercase()),
                }
            })
            .collect();

        let binds = self
            .binds
            .map(Directive::into_lines)
            .unwrap_or_default()
            .iter()
            .map(|bind| parse_bind(bind, reference_dir).map_err(&invalid))
            .collect::<Result<Vec<_>>>()?;

        let argv = |d: Option<Directive>| -> Result<Vec<String>> {
            match d {
                Some(d) => d.into_argv().map_err(&invalid),
                None => Ok(Vec::new()),
            }
        };

        Ok(Layer {
            from: self.from,
            import,
            run: self.run.map(Directive::into_lines).unwrap_or_default(),
            cmd: argv(self.cmd)?,
            entrypoint: argv(self.entrypoint)?,
            full_command: argv(self.full_command)?,
            build_env_passthrough: self.build_env_passthrough,
            build_env: self.build_env,
            environment: self.environment,
            volumes: self.volumes,
            labels: self.labels,
            generate_labels: self
                .generate_labels
                .map(Directive::into_lines)
                .unwrap_or_default(),
            working_dir: self.working_dir,
            build_only: self.build_only,
            binds,
            runtime_user: self.runtime_user,
        })
    }
}

/// Parsed stratumfile: layers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Stratumfile {
    /// Directory the file was loaded from
    pub reference_dir: PathBuf,
    pub layers: BTreeMap<String, Layer>,
}

impl Stratumfile {
    /// Parse YAML content; relative paths resolve against `reference_dir`.
    pub fn parse(content: &str, reference_dir: &Path) -> Result<Self> {
        let raw: BTreeMap<String, RawLayer> = serde_yaml::from_str(content)?;

        let mut layers = BTreeMap::new();
        for (name, raw_layer) in raw {
            let layer = raw_layer.normalize(&name, reference_dir)?;
            layers.insert(name, layer);
        }

        tracing::debug!(
            layers = layers.len(),
            dir = %reference_dir.display(),
            "Loaded stratumfile"
        );

        Ok(Self {
            reference_dir: reference_dir.to_path_buf(),
            layers,
        })
    }

    /// Load a stratumfile from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::io(format!("read stratumfile {}", path.display()), e)
        })?;
        let reference_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let reference_dir = if reference_dir.as_os_str().is_empty() {
            std::env::current_dir().map_err(|e| StratumError::io("resolve current directory", e))?
        } else {
            reference_dir
        };
        Self::parse(&content, &reference_dir)
    }

    /// Look up a layer by name.
    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }
}

/// Resolve `path` against `reference_dir` unless it is absolute or a URL.
fn absolutize(path: &str, reference_dir: &Path) -> String {
    if is_url(path) || Path::new(path).is_absolute() {
        path.to_string()
    } else {
        reference_dir.join(path).to_string_lossy().into_owned()
    }
}

/// Parse `source` or `source -> target`.
fn parse_bind(bind: &str, reference_dir: &Path) -> std::result::Result<BindMount, String> {
    let parts: Vec<&str> = bind.split("->").collect();
    if parts.len() > 2 {
        return Err(format!("invalid bind mount '{}'", bind));
    }

    let source = parts[0].trim();
    if source.is_empty() {
        return Err(format!("invalid bind mount '{}': empty source", bind));
    }
    let target = parts.get(1).map(|t| t.trim()).unwrap_or(source);

    Ok(BindMount {
        source: absolutize(source, reference_dir),
        target: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SourceType;

    fn load(yaml: &str) -> Stratumfile {
        Stratumfile::parse(yaml, Path::new("/build")).unwrap()
    }

    #[test]
    fn test_run_string_is_one_entry() {
        let sf = load("foo:\n  run: |\n    echo hello\n    echo bye\n");
        assert_eq!(sf.get("foo").unwrap().run, vec!["echo hello\necho bye\n"]);
    }

    #[test]
    fn test_run_list() {
        let sf = load("foo:\n  run:\n    - echo a\n    - echo b\n");
        assert_eq!(sf.get("foo").unwrap().run, vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_cmd_string_is_shell_split() {
        let sf = load("foo:\n  cmd: /bin/app --name 'hello world'\n");
        assert_eq!(
            sf.get("foo").unwrap().cmd,
            vec!["/bin/app", "--name", "hello world"]
        );
    }

    #[test]
    fn test_entrypoint_list_taken_verbatim() {
        let sf = load("foo:\n  entrypoint: [\"/init\", \"a b\"]\n");
        assert_eq!(sf.get("foo").unwrap().entrypoint, vec!["/init", "a b"]);
    }

    #[test]
    fn test_unbalanced_quote_is_invalid() {
        let result = Stratumfile::parse("foo:\n  cmd: \"/bin/app 'oops\"\n", Path::new("/"));
        assert!(matches!(result, Err(StratumError::InvalidLayer { .. })));
    }

    #[test]
    fn test_import_forms() {
        let sf = load(
            "a:\n  import: single.txt\nb:\n  import:\n    path: m.tar\n    hash: ABCDEF\nc:\n  import:\n    - x.txt\n    - path: /abs/y.txt\n      hash: 00ff\n    - https://example.com/z\n",
        );

        assert_eq!(
            sf.get("a").unwrap().import,
            vec![ImportSpec {
                path: "/build/single.txt".to_string(),
                hash: None
            }]
        );
        assert_eq!(
            sf.get("b").unwrap().import,
            vec![ImportSpec {
                path: "/build/m.tar".to_string(),
                hash: Some("abcdef".to_string())
            }]
        );

        let c = &sf.get("c").unwrap().import;
        assert_eq!(c.len(), 3);
        assert_eq!(c[0].path, "/build/x.txt");
        assert_eq!(c[1].path, "/abs/y.txt");
        assert_eq!(c[1].hash.as_deref(), Some("00ff"));
        assert_eq!(c[2].path, "https://example.com/z");
    }

    #[test]
    fn test_binds() {
        let sf = load("foo:\n  binds:\n    - cache -> /var/cache\n    - /dev/kvm\n");
        let binds = &sf.get("foo").unwrap().binds;
        assert_eq!(
            binds[0],
            BindMount {
                source: "/build/cache".to_string(),
                target: "/var/cache".to_string()
            }
        );
        assert_eq!(
            binds[1],
            BindMount {
                source: "/dev/kvm".to_string(),
                target: "/dev/kvm".to_string()
            }
        );
    }

    #[test]
    fn test_bad_bind() {
        let result = Stratumfile::parse("foo:\n  binds: a -> b -> c\n", Path::new("/"));
        assert!(matches!(result, Err(StratumError::InvalidLayer { .. })));
    }

    #[test]
    fn test_from_and_flags() {
        let sf = load(
            "foo:\n  from:\n    type: docker\n    url: docker://centos:latest\n  build_only: true\n  runtime_user: nobody\n  working_dir: /srv\n",
        );
        let layer = sf.get("foo").unwrap();
        let from = layer.from.as_ref().unwrap();
        assert_eq!(from.source_type, SourceType::Docker);
        assert_eq!(from.url, "docker://centos:latest");
        assert!(layer.build_only);
        assert_eq!(layer.runtime_user, "nobody");
        assert_eq!(layer.working_dir, "/srv");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Stratumfile::parse("foo:\n  rnu: typo\n", Path::new("/"));
        assert!(matches!(result, Err(StratumError::SerializationError(_))));
    }

    #[test]
    fn test_equivalent_forms_hash_equal() {
        let a = load("foo:\n  run: echo hi\n  import: x\n");
        let b = load("foo:\n  run:\n    - echo hi\n  import:\n    - path: x\n");
        assert_eq!(
            a.get("foo").unwrap().spec_hash().unwrap(),
            b.get("foo").unwrap().spec_hash().unwrap()
        );
    }

    #[test]
    fn test_from_path_sets_reference_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stratum.yaml");
        std::fs::write(&path, "foo:\n  import: data.txt\n").unwrap();

        let sf = Stratumfile::from_path(&path).unwrap();
        assert_eq!(sf.reference_dir, tmp.path());
        assert_eq!(
            sf.get("foo").unwrap().import[0].path,
            tmp.path().join("data.txt").to_string_lossy()
        );
    }
}
