use std::collections::BTreeMap;

use platform::graph::{Arg, CollectionRef, ExprGraph, ImageRef};

use crate::settings::DoyWindow;

/// Appends per-band harmonic phase/amplitude features. The regression
/// itself is the platform's; each configured band gets its own fit bounded
/// by the band's day-of-year window, producing `{band}_phase` and
/// `{band}_amplitude`. Stacking the per-band images injects collection
/// index prefixes into the band names, so those are stripped before the
/// result is exposed.
pub fn add_harmonics(
    graph: &mut ExprGraph,
    collection: CollectionRef,
    options: &BTreeMap<String, DoyWindow>,
) -> ImageRef {
    assert!(!options.is_empty(), "harmonics options must be validated upstream");

    let per_band: Vec<_> = options
        .iter()
        .map(|(band, window)| {
            graph.invoke(
                "Collection.harmonicRegression",
                [
                    ("collection", collection.into()),
                    ("band", band.as_str().into()),
                    ("doy_start", window.start.into()),
                    ("doy_end", window.end.into()),
                ],
            )
        })
        .collect();

    let stacked = graph.invoke("Collection.fromImages", [("images", Arg::Nodes(per_band))]);
    let bands = graph.invoke("Collection.toBands", [("collection", stacked.into())]);
    let renamed = graph.invoke(
        "Image.stripBandPrefix",
        [("image", bands.into()), ("count", 2i64.into())],
    );
    ImageRef(renamed)
}
