//! Per-year WMS GetMap request construction.

use std::fmt::Write;
use std::path::PathBuf;

use crate::config::ImageryConfig;
use crate::geo::{BoundingBox, GeoQuery};
use crate::workspace::RunWorkspace;

/// One imagery request: the year it depicts, where to fetch it and where to store it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub year: i32,
    pub bbox: BoundingBox,
    pub url: String,
    pub destination: PathBuf,
}

/// Build the request for `year`. Pure: no I/O is performed.
pub fn build_request(
    imagery: &ImageryConfig,
    query: &GeoQuery,
    year: i32,
    workspace: &RunWorkspace,
) -> FrameRequest {
    let bbox = query.bounding_box();

    let mut url = String::with_capacity(imagery.base_url.len() + 256);
    url.push_str(&imagery.base_url);
    url.push(if imagery.base_url.contains('?') { '&' } else { '?' });

    // writing into a String cannot fail
    let _ = write!(
        url,
        "service=WMS&version={}&request=GetMap&layers={}&styles={}&format={}&transparent={}\
         &height={}&width={}&bbox={}&CRS={}&time={:04}-01-01",
        imagery.version,
        imagery.layer,
        imagery.style,
        imagery.format,
        imagery.transparent,
        imagery.height,
        imagery.width,
        bbox,
        imagery.crs,
        year,
    );

    FrameRequest { year, bbox, url, destination: workspace.frame_path(year) }
}
