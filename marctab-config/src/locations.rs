/// Source and target table locations.
///
/// The defaults differ between the LDP1 and Metadb configurations; any of
/// the source names can be overridden individually.
#[derive(Debug, Clone)]
pub struct Locations {
    /// Table holding the record headers (id, matched_id, external_hrid, state).
    pub srs_records: String,
    /// Table holding the MARC JSON payloads, joined on id.
    pub srs_marc: String,
    /// Column of `srs_marc` containing the MARC JSON.
    pub srs_marc_attr: String,
    /// Schema the finished table is published into.
    pub final_schema: String,
    /// Name of the published table.
    pub final_table: String,
}

impl Locations {
    /// Defaults for the LDP1 configuration.
    pub fn for_ldp1() -> Self {
        Locations {
            srs_records: "public.srs_records".to_string(),
            srs_marc: "public.srs_marc".to_string(),
            srs_marc_attr: "data".to_string(),
            final_schema: "public".to_string(),
            final_table: "srs_marctab".to_string(),
        }
    }

    /// Defaults for the Metadb configuration.
    pub fn for_metadb() -> Self {
        Locations {
            srs_records: "folio_source_record.records_lb".to_string(),
            srs_marc: "folio_source_record.marc_records_lb".to_string(),
            srs_marc_attr: "content".to_string(),
            final_schema: "folio_source_record".to_string(),
            final_table: "marctab".to_string(),
        }
    }

    /// Resolves the locations for a run: dialect defaults plus any per-name
    /// overrides.
    pub fn new(
        metadb: bool,
        srs_records: Option<String>,
        srs_marc: Option<String>,
        srs_marc_attr: Option<String>,
    ) -> Self {
        let mut loc = if metadb {
            Locations::for_metadb()
        } else {
            Locations::for_ldp1()
        };
        if let Some(records) = srs_records {
            loc.srs_records = records;
        }
        if let Some(marc) = srs_marc {
            loc.srs_marc = marc;
        }
        if let Some(attr) = srs_marc_attr {
            loc.srs_marc_attr = attr;
        }
        loc
    }

    /// Schema-qualified name of the published table.
    pub fn table_final(&self) -> String {
        format!("{}.{}", self.final_schema, self.final_table)
    }
}
