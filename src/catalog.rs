use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const ERA_COLUMN: &str = "時代";
pub const KEYWORD_COLUMN: &str = "キーワード";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("CSVファイルを読み込めません: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSVデータが空です")]
    Empty,
    #[error("CSVヘッダーに「時代」または「キーワード」が見つかりません")]
    MissingColumns,
    #[error("CSVヘッダーを読み込めません: {0}")]
    Header(#[from] csv::Error),
    #[error("有効なデータ行が見つかりません")]
    NoValidRows,
}

/// Keywords grouped by era, loaded once from the data file.
#[derive(Debug, Clone, Default)]
pub struct KeywordCatalog {
    keywords_by_era: HashMap<String, Vec<String>>,
    // first-seen order, used for the era keyboard
    eras: Vec<String>,
}

impl KeywordCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        log::info!("Loading keyword catalog from {}", path.display());
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, CatalogError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Self, CatalogError> {
        let content = content.trim_start_matches('\u{feff}').trim();
        if content.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers()?.clone();
        let era_idx = headers.iter().position(|h| h == ERA_COLUMN);
        let keyword_idx = headers.iter().position(|h| h == KEYWORD_COLUMN);
        let (Some(era_idx), Some(keyword_idx)) = (era_idx, keyword_idx) else {
            return Err(CatalogError::MissingColumns);
        };

        let mut catalog = Self::default();
        let mut rows = 0;
        for (i, record) in reader.records().enumerate() {
            rows += 1;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Skipping unreadable CSV row {}: {}", i + 2, e);
                    continue;
                }
            };
            match (record.get(era_idx), record.get(keyword_idx)) {
                (Some(era), Some(keyword)) if !era.is_empty() && !keyword.is_empty() => {
                    catalog.insert(era, keyword);
                }
                _ => log::debug!("Skipping incomplete CSV row {}", i + 2),
            }
        }

        if rows == 0 {
            return Err(CatalogError::Empty);
        }
        if catalog.eras.is_empty() {
            return Err(CatalogError::NoValidRows);
        }

        log::info!(
            "Catalog loaded: {} eras, {} keywords",
            catalog.eras.len(),
            catalog.keyword_count()
        );
        Ok(catalog)
    }

    fn insert(&mut self, era: &str, keyword: &str) {
        if !self.keywords_by_era.contains_key(era) {
            self.eras.push(era.to_string());
        }
        self.keywords_by_era
            .entry(era.to_string())
            .or_default()
            .push(keyword.to_string());
    }

    pub fn keywords(&self, era: &str) -> Option<&[String]> {
        self.keywords_by_era.get(era).map(Vec::as_slice)
    }

    pub fn eras(&self) -> impl Iterator<Item = &str> {
        self.eras.iter().map(String::as_str)
    }

    pub fn contains_era(&self, era: &str) -> bool {
        self.keywords_by_era.contains_key(era)
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords_by_era.values().map(Vec::len).sum()
    }
}

impl FromIterator<(String, String)> for KeywordCatalog {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut catalog = Self::default();
        for (era, keyword) in iter {
            catalog.insert(&era, &keyword);
        }
        catalog
    }
}
