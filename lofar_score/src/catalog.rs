//! Component catalog and per-focus-source indexing.
//!
//! The catalog is a flat table of components, each tagged with the source it
//! belongs to. [`ComponentCatalog`] groups it by source name and keeps a
//! declination-sorted index for the neighbour box query. [`CatalogIndexer`]
//! resolves the focus source of every evaluated image once per run and hands
//! the result by reference to the later stages.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

/// One catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "Component_Name")]
    pub component_name: String,
    #[serde(rename = "Source_Name")]
    pub source_name: String,
    /// Right ascension in degrees
    #[serde(rename = "RA")]
    pub ra: f64,
    /// Declination in degrees
    #[serde(rename = "DEC")]
    pub dec: f64,
}

/// A source: all components sharing a source name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_name: String,
    /// Centroid right ascension in degrees
    pub ra: f64,
    /// Centroid declination in degrees
    pub dec: f64,
    pub n_components: usize,
}

/// In-memory component table with source grouping and a DEC range index
#[derive(Debug, Clone)]
pub struct ComponentCatalog {
    components: Vec<Component>,
    /// Source name -> component row indices, in catalog order
    by_source: HashMap<String, Vec<usize>>,
    /// Component name -> first row carrying that name
    by_component: HashMap<String, usize>,
    /// Row indices sorted by declination
    dec_order: Vec<usize>,
}

impl ComponentCatalog {
    pub fn from_components(components: Vec<Component>) -> Self {
        let mut by_source: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_component = HashMap::with_capacity(components.len());

        for (idx, comp) in components.iter().enumerate() {
            by_source
                .entry(comp.source_name.clone())
                .or_default()
                .push(idx);
            by_component.entry(comp.component_name.clone()).or_insert(idx);
        }

        let mut dec_order: Vec<usize> = (0..components.len()).collect();
        dec_order.sort_by(|&a, &b| components[a].dec.total_cmp(&components[b].dec));

        Self {
            components,
            by_source,
            by_component,
            dec_order,
        }
    }

    /// Read a CSV catalog. Columns other than Source_Name, Component_Name,
    /// RA and DEC are ignored.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let components = reader
            .deserialize::<Component>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log::info!(
            "Loaded {} components ({} sources) from {}",
            components.len(),
            components
                .iter()
                .map(|c| c.source_name.as_str())
                .collect::<HashSet<_>>()
                .len(),
            path.display()
        );
        Ok(Self::from_components(components))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn num_sources(&self) -> usize {
        self.by_source.len()
    }

    /// Row indices of the components of `source_name`
    pub fn component_indices(&self, source_name: &str) -> Option<&[usize]> {
        self.by_source.get(source_name).map(|v| v.as_slice())
    }

    pub fn component_by_name(&self, component_name: &str) -> Option<&Component> {
        self.by_component
            .get(component_name)
            .map(|&idx| &self.components[idx])
    }

    /// Number of components grouped under `source_name`
    pub fn component_count(&self, source_name: &str) -> Option<usize> {
        self.by_source.get(source_name).map(|v| v.len())
    }

    /// Build the [`Source`] record for a source name
    pub fn source(&self, source_name: &str) -> Option<Source> {
        let indices = self.by_source.get(source_name)?;
        let (ra, dec) = mean_position(indices.iter().map(|&i| &self.components[i]));
        Some(Source {
            source_name: source_name.to_string(),
            ra,
            dec,
            n_components: indices.len(),
        })
    }

    /// Rows strictly inside the box `|ΔRA| < r`, `|ΔDEC| < r` (degrees).
    ///
    /// No `cos(dec)` correction is applied to the RA half-width. Returned in
    /// catalog order.
    pub fn indices_in_box(&self, ra: f64, dec: f64, half_width_deg: f64) -> Vec<usize> {
        let lo = self
            .dec_order
            .partition_point(|&i| self.components[i].dec <= dec - half_width_deg);
        let hi = self
            .dec_order
            .partition_point(|&i| self.components[i].dec < dec + half_width_deg);

        let mut hits: Vec<usize> = self.dec_order[lo..hi.max(lo)]
            .iter()
            .copied()
            .filter(|&i| {
                let comp = &self.components[i];
                comp.ra < ra + half_width_deg
                    && comp.ra > ra - half_width_deg
                    && comp.dec < dec + half_width_deg
                    && comp.dec > dec - half_width_deg
            })
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Mean sky position of a set of components, averaged on the unit sphere
fn mean_position<'a>(components: impl Iterator<Item = &'a Component>) -> (f64, f64) {
    let sum = components.fold(Vector3::zeros(), |acc, comp| {
        let (ra, dec) = (comp.ra.to_radians(), comp.dec.to_radians());
        acc + Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
    });
    let norm = sum.norm();
    if norm == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let v = sum / norm;
    let ra = v.y.atan2(v.x).to_degrees().rem_euclid(360.0);
    (ra, v.z.asin().to_degrees())
}

/// Focus name encoded in an image file name.
///
/// The cutout file stem starts with the focus name followed by `_`, e.g.
/// `ILTJ110530.36+465055.8_radio_DR2_rotated0deg.png`.
pub fn focus_name_from_file_name(file_name: &str) -> String {
    let stem = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    stem.split('_').next().unwrap_or(stem).to_string()
}

/// FITS cutout path for a focus source
pub fn fits_path_for(fits_dir: &Path, focus_name: &str) -> PathBuf {
    fits_dir.join(format!("{focus_name}_radio_DR2.fits"))
}

/// Fail if any focus name occurs more than once.
pub fn check_unique_focus_names(focus_names: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(focus_names.len());
    let mut duplicates: Vec<String> = focus_names
        .iter()
        .filter(|name| !seen.insert(name.as_str()))
        .cloned()
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort();
    duplicates.dedup();
    Err(ScoreError::DuplicateSourceNames(duplicates))
}

/// Ground-truth catalog context of one evaluated image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusEntry {
    /// Name encoded in the image file name
    pub focus_name: String,
    /// Catalog source the focus belongs to
    pub source_name: String,
    /// Focus position in degrees
    pub ra: f64,
    pub dec: f64,
    pub n_components: usize,
    /// Components sharing the focus source name
    pub components: Vec<Component>,
    /// Other catalog entries inside the search box
    pub close_components: Vec<Component>,
    pub fits_path: PathBuf,
}

impl FocusEntry {
    pub fn is_single_component(&self) -> bool {
        self.n_components == 1
    }
}

/// Focus-source lookups for one evaluation run, in image order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndexer {
    entries: Vec<FocusEntry>,
}

impl CatalogIndexer {
    /// Resolve every focus name against the catalog.
    ///
    /// A focus name is looked up as a component name first; its parent source
    /// then defines the component group. Failing that it is taken as a source
    /// name and the focus position is the centroid of its components.
    ///
    /// # Errors
    /// * [`ScoreError::DuplicateSourceNames`] if a focus name repeats
    /// * [`ScoreError::CatalogLookup`] if a focus name is unknown
    pub fn build(
        catalog: &ComponentCatalog,
        focus_names: &[String],
        fits_dir: &Path,
        search_radius_arcsec: f64,
    ) -> Result<Self> {
        check_unique_focus_names(focus_names)?;

        let half_width = search_radius_arcsec / 3600.0;
        let entries = focus_names
            .iter()
            .map(|name| Self::resolve(catalog, name, fits_dir, half_width))
            .collect::<Result<Vec<_>>>()?;

        let indexer = Self { entries };
        indexer.log_summary();
        Ok(indexer)
    }

    fn resolve(
        catalog: &ComponentCatalog,
        focus_name: &str,
        fits_dir: &Path,
        half_width: f64,
    ) -> Result<FocusEntry> {
        let (source_name, ra, dec) = match catalog.component_by_name(focus_name) {
            Some(comp) => (comp.source_name.clone(), comp.ra, comp.dec),
            None => {
                let source = catalog
                    .source(focus_name)
                    .ok_or_else(|| ScoreError::CatalogLookup(focus_name.to_string()))?;
                (source.source_name, source.ra, source.dec)
            }
        };

        let own = catalog
            .component_indices(&source_name)
            .ok_or_else(|| ScoreError::CatalogLookup(source_name.clone()))?;
        let own_set: HashSet<usize> = own.iter().copied().collect();

        let components: Vec<Component> = own
            .iter()
            .map(|&i| catalog.components()[i].clone())
            .collect();
        let close_components: Vec<Component> = catalog
            .indices_in_box(ra, dec, half_width)
            .into_iter()
            .filter(|i| !own_set.contains(i))
            .map(|i| catalog.components()[i].clone())
            .collect();

        Ok(FocusEntry {
            focus_name: focus_name.to_string(),
            source_name,
            ra,
            dec,
            n_components: components.len(),
            components,
            close_components,
            fits_path: fits_path_for(fits_dir, focus_name),
        })
    }

    fn log_summary(&self) {
        if self.entries.is_empty() {
            return;
        }
        let single = self.entries.iter().filter(|e| e.is_single_component()).count();
        let total = self.entries.len();
        log::info!(
            "There are {} single component sources and {} multi ({:.0}% single component)",
            single,
            total - single,
            single as f64 / total as f64 * 100.0
        );
    }

    /// Wrap already resolved entries
    pub fn from_entries(entries: Vec<FocusEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FocusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn n_components(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.n_components).collect()
    }

    pub fn focus_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.focus_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn comp(component: &str, source: &str, ra: f64, dec: f64) -> Component {
        Component {
            component_name: component.to_string(),
            source_name: source.to_string(),
            ra,
            dec,
        }
    }

    fn test_catalog() -> ComponentCatalog {
        ComponentCatalog::from_components(vec![
            comp("C1", "S1", 180.0, 45.0),
            comp("C2a", "S2", 180.0078125, 45.0078125),
            comp("C2b", "S2", 180.015625, 45.015625),
            comp("C3", "S3", 180.03125, 45.0),
            comp("C4", "S4", 185.0, 45.0),
            comp("C5", "S5", 180.0, 40.0),
        ])
    }

    #[test]
    fn test_grouping_by_source() {
        let catalog = test_catalog();
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.num_sources(), 5);
        assert_eq!(catalog.component_count("S2"), Some(2));
        assert_eq!(catalog.component_count("S1"), Some(1));
        assert_eq!(catalog.component_count("missing"), None);
        assert_eq!(catalog.component_indices("S2"), Some(&[1usize, 2][..]));
    }

    #[test]
    fn test_source_centroid() {
        let catalog = test_catalog();
        let source = catalog.source("S2").unwrap();
        assert_eq!(source.n_components, 2);
        assert_relative_eq!(source.ra, 180.01171875, epsilon = 1e-4);
        assert_relative_eq!(source.dec, 45.01171875, epsilon = 1e-4);
    }

    #[test]
    fn test_centroid_across_ra_wrap() {
        let catalog = ComponentCatalog::from_components(vec![
            comp("a", "W", 359.99, 10.0),
            comp("b", "W", 0.01, 10.0),
        ]);
        let source = catalog.source("W").unwrap();
        assert!(source.ra < 0.001 || source.ra > 359.999, "ra = {}", source.ra);
    }

    #[test]
    fn test_box_query_is_strict() {
        let catalog = test_catalog();
        // C3 sits exactly on the RA edge and is excluded
        let hits = catalog.indices_in_box(180.0, 45.0, 0.03125);
        assert_eq!(hits, vec![0, 1, 2]);

        let hits = catalog.indices_in_box(180.0, 45.0, 0.0625);
        assert_eq!(hits, vec![0, 1, 2, 3]);

        assert!(catalog.indices_in_box(0.0, -80.0, 1.0).is_empty());
    }

    #[test]
    fn test_box_query_matches_linear_scan() {
        let catalog = test_catalog();
        for &(ra, dec, r) in &[(180.0, 45.0, 0.05), (182.5, 43.0, 3.0), (180.0, 40.0, 5.1)] {
            let expected: Vec<usize> = catalog
                .components()
                .iter()
                .enumerate()
                .filter(|(_, c)| {
                    c.ra < ra + r && c.ra > ra - r && c.dec < dec + r && c.dec > dec - r
                })
                .map(|(i, _)| i)
                .collect();
            assert_eq!(catalog.indices_in_box(ra, dec, r), expected);
        }
    }

    #[test]
    fn test_focus_name_from_file_name() {
        assert_eq!(
            focus_name_from_file_name("/data/all/ILTJ1+2_radio_DR2_rotated0deg.png"),
            "ILTJ1+2"
        );
        assert_eq!(focus_name_from_file_name("S1_x.png"), "S1");
        assert_eq!(focus_name_from_file_name("plain"), "plain");
    }

    #[test]
    fn test_duplicate_focus_names_fatal() {
        let names = vec!["S1".to_string(), "S2".to_string(), "S1".to_string()];
        match check_unique_focus_names(&names) {
            Err(ScoreError::DuplicateSourceNames(dups)) => assert_eq!(dups, vec!["S1"]),
            other => panic!("expected duplicate error, got {other:?}"),
        }

        let catalog = test_catalog();
        let result = CatalogIndexer::build(&catalog, &names, Path::new("fits"), 200.0);
        assert!(matches!(result, Err(ScoreError::DuplicateSourceNames(_))));
    }

    #[test]
    fn test_lookup_miss_fatal() {
        let catalog = test_catalog();
        let names = vec!["S1".to_string(), "nope".to_string()];
        let result = CatalogIndexer::build(&catalog, &names, Path::new("fits"), 200.0);
        assert!(matches!(result, Err(ScoreError::CatalogLookup(name)) if name == "nope"));
    }

    #[test]
    fn test_indexer_by_component_name() {
        let catalog = test_catalog();
        let names = vec!["C2a".to_string()];
        let indexer = CatalogIndexer::build(&catalog, &names, Path::new("/fits"), 200.0).unwrap();

        let entry = &indexer.entries()[0];
        assert_eq!(entry.source_name, "S2");
        assert_eq!(entry.n_components, 2);
        assert_eq!(entry.ra, 180.0078125);
        assert_eq!(entry.dec, 45.0078125);
        assert_eq!(entry.fits_path, PathBuf::from("/fits/C2a_radio_DR2.fits"));

        // Own components are never listed as close neighbours
        let close: Vec<&str> = entry
            .close_components
            .iter()
            .map(|c| c.component_name.as_str())
            .collect();
        assert_eq!(close, vec!["C1", "C3"]);
    }

    #[test]
    fn test_indexer_by_source_name() {
        let catalog = test_catalog();
        let names = vec!["S1".to_string(), "S2".to_string()];
        let indexer = CatalogIndexer::build(&catalog, &names, Path::new("fits"), 200.0).unwrap();

        assert_eq!(indexer.n_components(), vec![1, 2]);
        assert_eq!(indexer.focus_names(), vec!["S1", "S2"]);
        assert!(indexer.entries()[0].is_single_component());
        assert!(!indexer.entries()[1].is_single_component());
    }

    #[test]
    fn test_load_csv_ignores_extra_columns() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("comps.csv");
        std::fs::write(
            &path,
            "Source_Name,Component_Name,RA,DEC,Total_flux\n\
             S1,C1,180.0,45.0,1.2\n\
             S2,C2a,180.01,45.01,0.3\n\
             S2,C2b,180.02,45.02,0.4\n",
        )
        .unwrap();

        let catalog = ComponentCatalog::load_csv(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.component_count("S2"), Some(2));
        assert_eq!(catalog.component_by_name("C2b").unwrap().ra, 180.02);
    }

    #[test]
    fn test_load_csv_missing_column_is_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.csv");
        std::fs::write(&path, "Source_Name,RA,DEC\nS1,1.0,2.0\n").unwrap();
        assert!(matches!(
            ComponentCatalog::load_csv(&path),
            Err(ScoreError::Catalog(_))
        ));
    }
}
