//! Integration tests for loading resource dictionaries from a directory.

use std::fs;
use std::path::Path;

use granary::granularity::TimeGrain;
use granary::registry::ResourceDictionaries;
use chrono_tz::Tz;

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A minimal but complete resource directory: two dimensions, two metrics
/// (one multi-pass), one logical table over two physical tables.
fn seed(root: &Path) {
    write(
        &root.join("dimensions/page.yml"),
        r#"
api_name: page
description: Wiki page
rows:
  - id: rust_lang
    desc: Rust language
  - id: py_lang
    desc: Python language
"#,
    );
    // The loader picks up both .yml and .yaml.
    write(
        &root.join("dimensions/country.yaml"),
        r#"
api_name: country
aggregatable: false
"#,
    );
    write(
        &root.join("metrics/views.yml"),
        r#"
name: views
template:
  aggregations:
    - name: views
      type: longSum
      fieldName: views
"#,
    );
    write(
        &root.join("metrics/daily_avg.yml"),
        r#"
name: daily_avg_views
description: Average views per day
template:
  aggregations:
    - name: views_total
      type: longSum
      fieldName: views
    - name: days
      type: count
  post_aggregations:
    - type: arithmetic
      name: daily_avg_views
      fn: "/"
      fields:
        - type: fieldAccess
          fieldName: views_total
        - type: fieldAccess
          fieldName: days
  inner:
    time_grain: day
    aggregations:
      - name: views
        type: longSum
        fieldName: views
"#,
    );
    write(
        &root.join("tables/pageviews.yml"),
        r#"
name: pageViews
description: Wiki page views
dimensions: [page, country]
metrics: [views, daily_avg_views]
physical_tables:
  - name: pageviews_daily
    datasources: [pageviews]
    grain: day
    columns: [page, country, views]
    availability:
      page: ["2023-01-01/2024-07-01"]
      country: ["2023-01-01/2024-07-01"]
      views: ["2023-01-01/2024-07-01"]
  - name: pageviews_monthly
    datasources: [pv_2023, pv_2024]
    grain: month
    time_zone: America/New_York
    columns: [page, country, views]
"#,
    );
}

#[test]
fn loads_and_wires_a_resource_directory() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());

    let dicts = granary::load_and_validate(dir.path()).unwrap();
    assert_eq!(dicts.dimension_count(), 2);
    assert_eq!(dicts.metric_count(), 2);
    assert_eq!(dicts.table_count(), 1);

    let page = dicts.dimension("page").unwrap();
    assert_eq!(page.row_count(), 2);
    assert!(!dicts.dimension("country").unwrap().is_aggregatable());

    let metric = dicts.metric("daily_avg_views").unwrap();
    let template = metric.template.as_ref().unwrap();
    assert_eq!(template.depth(), 2);
    assert_eq!(template.innermost().time_grain(), Some(TimeGrain::Day));
    assert_eq!(
        template.output_names(),
        vec!["views_total", "days", "daily_avg_views"]
    );

    let table = dicts.table("pageViews").unwrap();
    let physicals = table.group().tables();
    assert_eq!(physicals.len(), 2);
    assert_eq!(physicals[0].name(), "pageviews_daily");
    assert_eq!(physicals[0].grain().grain(), TimeGrain::Day);
    assert!(physicals[0].columns().contains("views"));
    assert_eq!(physicals[1].grain().time_zone(), Tz::America__New_York);
    assert_eq!(physicals[1].datasource_names().len(), 2);
}

#[test]
fn duplicate_definitions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());
    write(
        &dir.path().join("dimensions/page_again.yaml"),
        "api_name: page\n",
    );

    let err = ResourceDictionaries::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("defined twice"));
}

#[test]
fn tables_resolve_their_dimensions_at_load_time() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());
    write(
        &dir.path().join("tables/broken.yml"),
        r#"
name: broken
dimensions: [continent]
metrics: [views]
physical_tables:
  - name: broken_daily
    datasources: [broken]
    grain: day
    columns: [continent, views]
"#,
    );

    let err = ResourceDictionaries::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("unknown dimension 'continent'"));
}

#[test]
fn validation_catches_unknown_metric_references() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());
    write(
        &dir.path().join("tables/clicks.yml"),
        r#"
name: clicks
dimensions: [page]
metrics: [click_total]
physical_tables:
  - name: clicks_daily
    datasources: [clicks]
    grain: day
    columns: [page, clicks]
"#,
    );

    let err = granary::load_and_validate(dir.path()).unwrap_err();
    assert!(err.to_string().contains("unknown metric 'click_total'"));
}

#[test]
fn a_missing_subdirectory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("dimensions/page.yml"), "api_name: page\n");

    let err = ResourceDictionaries::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("metrics directory not found"));
}
