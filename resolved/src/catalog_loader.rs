//! Parses the TOML catalog file format into the in-memory catalog data
//! model. The file syntax itself is an external collaborator: this
//! module's only job is turning it into `dns_types::catalog::types`
//! values, strictly, so a malformed file is caught at startup rather
//! than silently producing an empty zone.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

use dns_types::catalog::types::{Catalog, Zone, ZoneRecord};
use dns_types::protocol::types::{DomainName, RecordClass, RecordTypeWithData};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlCatalog {
    zones: Vec<TomlZone>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlZone {
    origin: String,
    #[serde(default)]
    records: Vec<TomlRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
enum TomlRecord {
    A {
        #[serde(rename = "domain-name")]
        domain_name: String,
        ttl: u32,
        #[serde(default = "default_class")]
        class: String,
        #[serde(rename = "host-address")]
        host_address: Ipv4Addr,
    },
    #[serde(rename = "CNAME")]
    Cname {
        #[serde(rename = "domain-name")]
        domain_name: String,
        ttl: u32,
        #[serde(default = "default_class")]
        class: String,
        cname: String,
    },
    #[serde(rename = "NS")]
    Ns {
        #[serde(rename = "domain-name")]
        domain_name: String,
        ttl: u32,
        #[serde(default = "default_class")]
        class: String,
        nsdname: String,
    },
    #[serde(rename = "SOA")]
    Soa {
        #[serde(rename = "domain-name")]
        domain_name: String,
        ttl: u32,
        #[serde(default = "default_class")]
        class: String,
        mname: String,
        /// Mailbox of the zone's administrator, as `local@domain`.
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
}

fn default_class() -> String {
    "IN".to_string()
}

/// Load and parse a catalog file, producing the in-memory catalog or
/// a `CatalogLoadError` describing what went wrong.
///
/// # Errors
///
/// If the file cannot be read, is not valid TOML, or does not match
/// the expected shape (unknown fields, missing fields, a bad domain
/// name or class name).
pub async fn load_catalog(path: &Path) -> Result<Catalog, CatalogLoadError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let parsed: TomlCatalog =
        toml::from_str(&contents).map_err(|source| CatalogLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut zones = Vec::with_capacity(parsed.zones.len());
    for zone in parsed.zones {
        zones.push(convert_zone(zone)?);
    }

    Ok(Catalog::new(zones))
}

fn convert_zone(zone: TomlZone) -> Result<Zone, CatalogLoadError> {
    let origin = DomainName::from_dotted_string(&zone.origin).ok_or_else(|| {
        CatalogLoadError::BadDomainName {
            domain_name: zone.origin.clone(),
        }
    })?;

    let mut records = Vec::with_capacity(zone.records.len());
    for record in zone.records {
        records.push(convert_record(record)?);
    }

    Ok(Zone { origin, records })
}

fn convert_record(record: TomlRecord) -> Result<ZoneRecord, CatalogLoadError> {
    let (domain_name, ttl, class, rtype_with_data) = match record {
        TomlRecord::A {
            domain_name,
            ttl,
            class,
            host_address,
        } => (
            domain_name,
            ttl,
            class,
            RecordTypeWithData::A {
                address: host_address,
            },
        ),
        TomlRecord::Cname {
            domain_name,
            ttl,
            class,
            cname,
        } => (
            domain_name,
            ttl,
            class,
            RecordTypeWithData::CNAME {
                cname: parse_domain_name(&cname)?,
            },
        ),
        TomlRecord::Ns {
            domain_name,
            ttl,
            class,
            nsdname,
        } => (
            domain_name,
            ttl,
            class,
            RecordTypeWithData::NS {
                nsdname: parse_domain_name(&nsdname)?,
            },
        ),
        TomlRecord::Soa {
            domain_name,
            ttl,
            class,
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => (
            domain_name,
            ttl,
            class,
            RecordTypeWithData::SOA {
                mname: parse_domain_name(&mname)?,
                rname: parse_email(&rname)?,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            },
        ),
    };

    Ok(ZoneRecord {
        domain_name,
        ttl,
        class: parse_class(&class)?,
        rtype_with_data,
    })
}

fn parse_domain_name(s: &str) -> Result<DomainName, CatalogLoadError> {
    DomainName::from_dotted_string(s).ok_or_else(|| CatalogLoadError::BadDomainName {
        domain_name: s.to_string(),
    })
}

fn parse_email(s: &str) -> Result<DomainName, CatalogLoadError> {
    DomainName::from_email_string(s).ok_or_else(|| CatalogLoadError::BadEmail {
        email: s.to_string(),
    })
}

fn parse_class(s: &str) -> Result<RecordClass, CatalogLoadError> {
    match s {
        "IN" => Ok(RecordClass::IN),
        "CS" => Ok(RecordClass::CS),
        "CH" => Ok(RecordClass::CH),
        "HS" => Ok(RecordClass::HS),
        other => Err(CatalogLoadError::BadClass {
            class: other.to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum CatalogLoadError {
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },
    BadDomainName {
        domain_name: String,
    },
    BadEmail {
        email: String,
    },
    BadClass {
        class: String,
    },
}

impl fmt::Display for CatalogLoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CatalogLoadError::Io { path, source } => {
                write!(f, "could not read catalog file {path:?}: {source}")
            }
            CatalogLoadError::Parse { path, source } => {
                write!(f, "could not parse catalog file {path:?}: {source}")
            }
            CatalogLoadError::BadDomainName { domain_name } => {
                write!(f, "not a valid domain name: {domain_name:?}")
            }
            CatalogLoadError::BadEmail { email } => {
                write!(f, "not a valid mailbox (expected local@domain): {email:?}")
            }
            CatalogLoadError::BadClass { class } => {
                write!(f, "not a recognised class: {class:?}")
            }
        }
    }
}

impl std::error::Error for CatalogLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogLoadError::Io { source, .. } => Some(source),
            CatalogLoadError::Parse { source, .. } => Some(source),
            CatalogLoadError::BadDomainName { .. }
            | CatalogLoadError::BadEmail { .. }
            | CatalogLoadError::BadClass { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_a_simple_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[zones]]
            origin = "example.com."

            [[zones.records]]
            type = "A"
            domain-name = "www"
            ttl = 3600
            host-address = "192.0.2.1"
            "#
        )
        .unwrap();

        let catalog = load_catalog(file.path()).await.unwrap();
        assert_eq!(1, catalog.zones.len());
        assert_eq!(1, catalog.zones[0].records.len());
    }

    #[tokio::test]
    async fn loads_an_soa_record_with_email_rname() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[zones]]
            origin = "example.com."

            [[zones.records]]
            type = "SOA"
            domain-name = "@"
            ttl = 3600
            mname = "ns1.example.com."
            rname = "admin@example.com"
            serial = 1
            refresh = 3600
            retry = 600
            expire = 86400
            minimum = 300
            "#
        )
        .unwrap();

        let catalog = load_catalog(file.path()).await.unwrap();
        let record = &catalog.zones[0].records[0];
        match &record.rtype_with_data {
            RecordTypeWithData::SOA { rname, .. } => {
                assert_eq!(Some("admin@example.com".to_string()), rname.to_email_string());
            }
            other => panic!("expected SOA, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_soa_rname_without_at() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[zones]]
            origin = "example.com."

            [[zones.records]]
            type = "SOA"
            domain-name = "@"
            ttl = 3600
            mname = "ns1.example.com."
            rname = "admin.example.com"
            serial = 1
            refresh = 3600
            retry = 600
            expire = 86400
            minimum = 300
            "#
        )
        .unwrap();

        assert!(load_catalog(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[zones]]
            origin = "example.com."
            bogus = "field"
            "#
        )
        .unwrap();

        assert!(load_catalog(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_file() {
        assert!(load_catalog(Path::new("/nonexistent/catalog.toml"))
            .await
            .is_err());
    }
}
