//! Typed bundle metadata: capabilities and requirements
//!
//! Reference: OSGi Core R4.3, section 3.2 (manifest headers) and 3.5/3.6
//! (Export-Package / Import-Package).

use super::clause::{parse_clauses, split_list, Clause};
use super::headers::Headers;
use crate::errors::{FrameworkError, Result};
use crate::version::{Version, VersionRange};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
pub const BUNDLE_VERSION: &str = "Bundle-Version";
pub const BUNDLE_MANIFEST_VERSION: &str = "Bundle-ManifestVersion";
pub const BUNDLE_ACTIVATOR: &str = "Bundle-Activator";
pub const BUNDLE_NAME: &str = "Bundle-Name";
pub const IMPORT_PACKAGE: &str = "Import-Package";
pub const EXPORT_PACKAGE: &str = "Export-Package";
pub const REQUIRE_BUNDLE: &str = "Require-Bundle";
pub const FRAGMENT_HOST: &str = "Fragment-Host";

static PACKAGE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$").expect("static pattern")
});
static SYMBOLIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("static pattern"));

/// Attributes with dedicated meaning; never matched as arbitrary attributes
const RESERVED_ATTRIBUTES: &[&str] = &[
    "version",
    "specification-version",
    "bundle-symbolic-name",
    "bundle-version",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedPackage {
    pub name: String,
    pub version: Version,
    /// Packages whose providers must be shared with importers
    pub uses: Vec<String>,
    /// Attributes an importer must specify to match
    pub mandatory: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPackage {
    pub name: String,
    pub range: VersionRange,
    pub resolution: Resolution,
    pub bundle_symbolic_name: Option<String>,
    pub bundle_version: VersionRange,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredBundle {
    pub symbolic_name: String,
    pub range: VersionRange,
    pub resolution: Resolution,
    pub reexport: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHost {
    pub symbolic_name: String,
    pub range: VersionRange,
}

/// "I provide X"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Package(ExportedPackage),
    Bundle { symbolic_name: String, version: Version },
    Host { symbolic_name: String, version: Version },
}

/// "I need Y"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Package(ImportedPackage),
    Bundle(RequiredBundle),
    Host(FragmentHost),
}

impl Requirement {
    pub fn is_optional(&self) -> bool {
        match self {
            Requirement::Package(p) => p.resolution == Resolution::Optional,
            Requirement::Bundle(b) => b.resolution == Resolution::Optional,
            Requirement::Host(_) => false,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Package(p) => {
                write!(f, "{}: {};version=\"{}\"", IMPORT_PACKAGE, p.name, p.range)?;
                if let Some(bsn) = &p.bundle_symbolic_name {
                    write!(f, ";bundle-symbolic-name={}", bsn)?;
                }
                for (k, v) in &p.attributes {
                    write!(f, ";{}={}", k, v)?;
                }
                Ok(())
            }
            Requirement::Bundle(b) => write!(
                f,
                "{}: {};bundle-version=\"{}\"",
                REQUIRE_BUNDLE, b.symbolic_name, b.range
            ),
            Requirement::Host(h) => write!(
                f,
                "{}: {};bundle-version=\"{}\"",
                FRAGMENT_HOST, h.symbolic_name, h.range
            ),
        }
    }
}

impl ImportedPackage {
    /// Whether `export` (from a bundle named `provider_name` at
    /// `provider_version`) satisfies this import
    pub fn matches(&self, export: &ExportedPackage, provider_name: Option<&str>, provider_version: &Version) -> bool {
        if export.name != self.name || !self.range.includes(&export.version) {
            return false;
        }
        if let Some(bsn) = &self.bundle_symbolic_name {
            if provider_name != Some(bsn.as_str()) {
                return false;
            }
        }
        if !self.bundle_version.includes(provider_version) {
            return false;
        }
        for (key, value) in &self.attributes {
            if export.attributes.get(key) != Some(value) {
                return false;
            }
        }
        for key in &export.mandatory {
            let specified = match key.as_str() {
                "bundle-symbolic-name" => self.bundle_symbolic_name.is_some(),
                "bundle-version" => self.bundle_version != VersionRange::any(),
                "version" | "specification-version" => self.range != VersionRange::any(),
                other => self.attributes.contains_key(other),
            };
            if !specified {
                return false;
            }
        }
        true
    }
}

/// Parsed form of a bundle's manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescription {
    pub manifest_version: u32,
    pub symbolic_name: Option<String>,
    pub singleton: bool,
    pub version: Version,
    pub name: Option<String>,
    pub activator: Option<String>,
    pub exports: Vec<ExportedPackage>,
    pub imports: Vec<ImportedPackage>,
    pub required_bundles: Vec<RequiredBundle>,
    pub fragment_host: Option<FragmentHost>,
}

impl BundleDescription {
    pub fn parse(headers: &Headers) -> Result<Self> {
        let manifest_version = match headers.get(BUNDLE_MANIFEST_VERSION).map(str::trim) {
            None => 1,
            Some("1") => 1,
            Some("2") => 2,
            Some(other) => {
                return Err(FrameworkError::Manifest {
                    header: BUNDLE_MANIFEST_VERSION.to_string(),
                    clause: other.to_string(),
                    message: "unsupported manifest version".to_string(),
                })
            }
        };

        let (symbolic_name, singleton) = parse_symbolic_name(headers)?;

        let version = match headers.get(BUNDLE_VERSION) {
            Some(text) => Version::parse(text).map_err(|e| FrameworkError::Manifest {
                header: BUNDLE_VERSION.to_string(),
                clause: text.to_string(),
                message: e.to_string(),
            })?,
            None => Version::empty(),
        };

        let activator = headers
            .get(BUNDLE_ACTIVATOR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let fragment_host = parse_fragment_host(headers)?;
        if fragment_host.is_some() {
            if let Some(activator) = &activator {
                return Err(FrameworkError::Manifest {
                    header: BUNDLE_ACTIVATOR.to_string(),
                    clause: activator.clone(),
                    message: "fragments cannot declare an activator".to_string(),
                });
            }
        }

        Ok(BundleDescription {
            manifest_version,
            symbolic_name,
            singleton,
            version,
            name: headers.get(BUNDLE_NAME).map(|s| s.trim().to_string()),
            activator,
            exports: parse_exports(headers)?,
            imports: parse_imports(headers)?,
            required_bundles: parse_required_bundles(headers)?,
            fragment_host,
        })
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self.exports.iter().cloned().map(Capability::Package).collect();
        if let Some(name) = &self.symbolic_name {
            if !self.is_fragment() {
                caps.push(Capability::Bundle {
                    symbolic_name: name.clone(),
                    version: self.version.clone(),
                });
                caps.push(Capability::Host {
                    symbolic_name: name.clone(),
                    version: self.version.clone(),
                });
            }
        }
        caps
    }

    /// Requirements in declaration order: host, imports, required bundles
    pub fn requirements(&self) -> Vec<Requirement> {
        let mut reqs = Vec::new();
        if let Some(host) = &self.fragment_host {
            reqs.push(Requirement::Host(host.clone()));
        }
        reqs.extend(self.imports.iter().cloned().map(Requirement::Package));
        reqs.extend(self.required_bundles.iter().cloned().map(Requirement::Bundle));
        reqs
    }
}

/// Parse raw headers into capability and requirement records
pub fn parse_capabilities(headers: &Headers) -> Result<(Vec<Capability>, Vec<Requirement>)> {
    let description = BundleDescription::parse(headers)?;
    Ok((description.capabilities(), description.requirements()))
}

fn single_clause(header: &str, value: &str) -> Result<Clause> {
    let mut clauses = parse_clauses(header, value)?;
    if clauses.len() != 1 || clauses[0].paths.len() != 1 {
        return Err(FrameworkError::Manifest {
            header: header.to_string(),
            clause: value.to_string(),
            message: "exactly one name expected".to_string(),
        });
    }
    Ok(clauses.remove(0))
}

fn check_symbolic_name(header: &str, clause: &Clause, name: &str) -> Result<()> {
    if SYMBOLIC_NAME.is_match(name) {
        Ok(())
    } else {
        Err(clause.error(header, format!("invalid symbolic name '{}'", name)))
    }
}

fn parse_resolution(header: &str, clause: &Clause) -> Result<Resolution> {
    match clause.directive("resolution") {
        None | Some("mandatory") => Ok(Resolution::Mandatory),
        Some("optional") => Ok(Resolution::Optional),
        Some(other) => Err(clause.error(header, format!("invalid resolution '{}'", other))),
    }
}

fn parse_range_attr(header: &str, clause: &Clause, key: &str) -> Result<VersionRange> {
    match clause.attribute(key) {
        Some(text) => VersionRange::parse(text).map_err(|e| clause.error(header, e.to_string())),
        None => Ok(VersionRange::any()),
    }
}

fn parse_symbolic_name(headers: &Headers) -> Result<(Option<String>, bool)> {
    let value = match headers.get(BUNDLE_SYMBOLIC_NAME) {
        Some(v) => v,
        None => return Ok((None, false)),
    };
    let clause = single_clause(BUNDLE_SYMBOLIC_NAME, value)?;
    clause.check_directives(
        BUNDLE_SYMBOLIC_NAME,
        &["singleton", "fragment-attachment", "mandatory"],
    )?;
    let name = clause.paths[0].clone();
    check_symbolic_name(BUNDLE_SYMBOLIC_NAME, &clause, &name)?;
    let singleton = match clause.directive("singleton") {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(clause.error(BUNDLE_SYMBOLIC_NAME, format!("invalid singleton value '{}'", other)))
        }
    };
    Ok((Some(name), singleton))
}

fn parse_fragment_host(headers: &Headers) -> Result<Option<FragmentHost>> {
    let value = match headers.get(FRAGMENT_HOST) {
        Some(v) => v,
        None => return Ok(None),
    };
    let clause = single_clause(FRAGMENT_HOST, value)?;
    clause.check_directives(FRAGMENT_HOST, &["extension"])?;
    if clause.directive("extension").is_some() {
        return Err(clause.error(FRAGMENT_HOST, "extension fragments are not supported"));
    }
    let symbolic_name = clause.paths[0].clone();
    check_symbolic_name(FRAGMENT_HOST, &clause, &symbolic_name)?;
    Ok(Some(FragmentHost {
        symbolic_name,
        range: parse_range_attr(FRAGMENT_HOST, &clause, "bundle-version")?,
    }))
}

fn extra_attributes(clause: &Clause) -> BTreeMap<String, String> {
    clause
        .attributes
        .iter()
        .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
        .cloned()
        .collect()
}

fn check_package_name(header: &str, clause: &Clause, name: &str) -> Result<()> {
    if PACKAGE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(clause.error(header, format!("invalid package name '{}'", name)))
    }
}

/// `version` with the legacy `specification-version` alias
fn package_version_text<'a>(header: &str, clause: &'a Clause) -> Result<Option<&'a str>> {
    match (clause.attribute("version"), clause.attribute("specification-version")) {
        (Some(v), Some(s)) if v.trim() != s.trim() => Err(clause.error(
            header,
            "version and specification-version differ",
        )),
        (Some(v), _) => Ok(Some(v)),
        (None, s) => Ok(s),
    }
}

fn parse_exports(headers: &Headers) -> Result<Vec<ExportedPackage>> {
    let value = match headers.get(EXPORT_PACKAGE) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Ok(Vec::new()),
    };
    let mut exports = Vec::new();
    for clause in parse_clauses(EXPORT_PACKAGE, value)? {
        clause.check_directives(EXPORT_PACKAGE, &["uses", "mandatory", "include", "exclude"])?;
        for key in ["bundle-symbolic-name", "bundle-version"] {
            if clause.attribute(key).is_some() {
                return Err(clause.error(EXPORT_PACKAGE, format!("attribute '{}' not allowed on exports", key)));
            }
        }
        let version = match package_version_text(EXPORT_PACKAGE, &clause)? {
            Some(text) => Version::parse(text).map_err(|e| clause.error(EXPORT_PACKAGE, e.to_string()))?,
            None => Version::empty(),
        };
        let uses = clause.directive("uses").map(split_list).unwrap_or_default();
        let mandatory = clause.directive("mandatory").map(split_list).unwrap_or_default();
        let attributes = extra_attributes(&clause);
        for path in &clause.paths {
            check_package_name(EXPORT_PACKAGE, &clause, path)?;
            exports.push(ExportedPackage {
                name: path.clone(),
                version: version.clone(),
                uses: uses.clone(),
                mandatory: mandatory.clone(),
                attributes: attributes.clone(),
            });
        }
    }
    Ok(exports)
}

fn parse_imports(headers: &Headers) -> Result<Vec<ImportedPackage>> {
    let value = match headers.get(IMPORT_PACKAGE) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Ok(Vec::new()),
    };
    let mut imports = Vec::new();
    let mut seen = HashSet::new();
    for clause in parse_clauses(IMPORT_PACKAGE, value)? {
        clause.check_directives(IMPORT_PACKAGE, &["resolution"])?;
        let resolution = parse_resolution(IMPORT_PACKAGE, &clause)?;
        let range = match package_version_text(IMPORT_PACKAGE, &clause)? {
            Some(text) => VersionRange::parse(text).map_err(|e| clause.error(IMPORT_PACKAGE, e.to_string()))?,
            None => VersionRange::any(),
        };
        let bundle_symbolic_name = clause.attribute("bundle-symbolic-name").map(str::to_string);
        let bundle_version = parse_range_attr(IMPORT_PACKAGE, &clause, "bundle-version")?;
        let attributes = extra_attributes(&clause);
        for path in &clause.paths {
            check_package_name(IMPORT_PACKAGE, &clause, path)?;
            if !seen.insert(path.clone()) {
                return Err(clause.error(IMPORT_PACKAGE, format!("package '{}' imported twice", path)));
            }
            imports.push(ImportedPackage {
                name: path.clone(),
                range: range.clone(),
                resolution,
                bundle_symbolic_name: bundle_symbolic_name.clone(),
                bundle_version: bundle_version.clone(),
                attributes: attributes.clone(),
            });
        }
    }
    Ok(imports)
}

fn parse_required_bundles(headers: &Headers) -> Result<Vec<RequiredBundle>> {
    let value = match headers.get(REQUIRE_BUNDLE) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Ok(Vec::new()),
    };
    let mut required = Vec::new();
    for clause in parse_clauses(REQUIRE_BUNDLE, value)? {
        clause.check_directives(REQUIRE_BUNDLE, &["visibility", "resolution"])?;
        let resolution = parse_resolution(REQUIRE_BUNDLE, &clause)?;
        let reexport = match clause.directive("visibility") {
            None | Some("private") => false,
            Some("reexport") => true,
            Some(other) => return Err(clause.error(REQUIRE_BUNDLE, format!("invalid visibility '{}'", other))),
        };
        let range = parse_range_attr(REQUIRE_BUNDLE, &clause, "bundle-version")?;
        for path in &clause.paths {
            check_symbolic_name(REQUIRE_BUNDLE, &clause, path)?;
            required.push(RequiredBundle {
                symbolic_name: path.clone(),
                range: range.clone(),
                resolution,
                reexport,
            });
        }
    }
    Ok(required)
}

/// Parse an Export-Package style string, used for system bundle packages
pub fn parse_export_list(value: &str) -> Result<Vec<ExportedPackage>> {
    let headers: Headers = vec![(EXPORT_PACKAGE, value)].into_iter().collect();
    parse_exports(&headers)
}
