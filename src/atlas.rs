use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("atlas line {line}: {message}")]
pub struct AtlasError {
    pub line: usize,
    pub message: String,
}

impl AtlasError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PageFilter {
    Nearest,
    Linear,
    MipMap,
}

#[derive(Clone, Debug)]
pub struct AtlasPage {
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub min_filter: PageFilter,
    pub mag_filter: PageFilter,
    pub pma: bool,
    pub regions: Vec<AtlasRegion>,
}

#[derive(Clone, Debug)]
pub struct AtlasRegion {
    pub name: String,
    pub u: f32,
    pub v: f32,
    pub u2: f32,
    pub v2: f32,
    /// 0 or 90. A 90 degree region occupies a width/height swapped
    /// footprint in the page.
    pub degrees: u32,
    pub width: f32,
    pub height: f32,
    pub orig_width: f32,
    pub orig_height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

/// A parsed texture atlas in the line-oriented format the Spine editor and
/// the libgdx texture packer produce. Blank lines separate pages; the first
/// line of a page block names the page image, `key: value` lines describe
/// the page or the current region, and a line without `:` starts a region.
#[derive(Clone, Debug, Default)]
pub struct Atlas {
    pub pages: Vec<AtlasPage>,
}

impl Atlas {
    pub fn parse(text: &str) -> Result<Self, AtlasError> {
        let mut pages = Vec::new();
        let mut page: Option<PageBuilder> = None;
        let mut region: Option<RegionBuilder> = None;
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                if let Some(mut done) = page.take() {
                    take_region(&mut done, &mut region)?;
                    pages.push(done.finish()?);
                }
                continue;
            }
            match line.find(':') {
                None => match page.as_mut() {
                    None => page = Some(PageBuilder::new(line, line_no)),
                    Some(current) => {
                        take_region(current, &mut region)?;
                        region = Some(RegionBuilder::new(line, line_no));
                    }
                },
                Some(colon) => {
                    let key = line[..colon].trim_end();
                    let values = line[colon + 1..]
                        .split(',')
                        .map(|it| it.trim())
                        .collect::<Vec<&str>>();
                    if let Some(current) = region.as_mut() {
                        current.apply(key, &values, line_no)?;
                    } else if let Some(current) = page.as_mut() {
                        current.apply(key, &values, line_no)?;
                    } else {
                        return Err(AtlasError::new(line_no, "property line before any page header"));
                    }
                }
            }
        }
        if let Some(mut done) = page.take() {
            take_region(&mut done, &mut region)?;
            pages.push(done.finish()?);
        }
        Ok(Self { pages })
    }

    /// Looks a region up across every page. Returns the page index alongside
    /// the region so callers can pair it with the page texture.
    pub fn find_region(&self, name: &str) -> Option<(usize, &AtlasRegion)> {
        self.pages.iter().enumerate().find_map(|(page_id, page)| {
            page.regions
                .iter()
                .find(|it| it.name == name)
                .map(|it| (page_id, it))
        })
    }
}

fn take_region(page: &mut PageBuilder, region: &mut Option<RegionBuilder>) -> Result<(), AtlasError> {
    if let Some(done) = region.take() {
        let (page_width, page_height) = page.size.ok_or_else(|| {
            AtlasError::new(done.line, "page size must be declared before its regions")
        })?;
        page.regions.push(done.finish(page_width, page_height)?);
    }
    Ok(())
}

struct PageBuilder {
    name: String,
    line: usize,
    size: Option<(f32, f32)>,
    min_filter: PageFilter,
    mag_filter: PageFilter,
    pma: bool,
    regions: Vec<AtlasRegion>,
}

impl PageBuilder {
    fn new(name: &str, line: usize) -> Self {
        Self {
            name: name.to_string(),
            line,
            size: None,
            min_filter: PageFilter::Nearest,
            mag_filter: PageFilter::Nearest,
            pma: false,
            regions: Vec::new(),
        }
    }

    fn apply(&mut self, key: &str, values: &[&str], line: usize) -> Result<(), AtlasError> {
        match key {
            "size" => self.size = Some(parse_pair(values, line)?),
            "filter" => {
                if values.len() != 2 {
                    return Err(AtlasError::new(line, "filter expects two values"));
                }
                self.min_filter = parse_filter(values[0], line)?;
                self.mag_filter = parse_filter(values[1], line)?;
            }
            "pma" => self.pma = parse_bool(values.first().copied().unwrap_or(""), line)?,
            // format, repeat and scale do not affect how regions are
            // resolved; they are accepted and skipped.
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<AtlasPage, AtlasError> {
        let (width, height) = self
            .size
            .ok_or_else(|| AtlasError::new(self.line, format!("page `{}` has no size", self.name)))?;
        Ok(AtlasPage {
            name: self.name,
            width,
            height,
            min_filter: self.min_filter,
            mag_filter: self.mag_filter,
            pma: self.pma,
            regions: self.regions,
        })
    }
}

struct RegionBuilder {
    name: String,
    line: usize,
    xy: Option<(f32, f32)>,
    size: Option<(f32, f32)>,
    orig: Option<(f32, f32)>,
    offset: (f32, f32),
    degrees: u32,
}

impl RegionBuilder {
    fn new(name: &str, line: usize) -> Self {
        Self {
            name: name.to_string(),
            line,
            xy: None,
            size: None,
            orig: None,
            offset: (0.0, 0.0),
            degrees: 0,
        }
    }

    fn apply(&mut self, key: &str, values: &[&str], line: usize) -> Result<(), AtlasError> {
        match key {
            "xy" => self.xy = Some(parse_pair(values, line)?),
            "size" => self.size = Some(parse_pair(values, line)?),
            "orig" => self.orig = Some(parse_pair(values, line)?),
            "offset" => self.offset = parse_pair(values, line)?,
            "bounds" => {
                let (x, y, w, h) = parse_quad(values, line)?;
                self.xy = Some((x, y));
                self.size = Some((w, h));
            }
            "offsets" => {
                let (x, y, w, h) = parse_quad(values, line)?;
                self.offset = (x, y);
                self.orig = Some((w, h));
            }
            "rotate" => {
                let value = values.first().copied().unwrap_or("");
                self.degrees = match value {
                    "true" => 90,
                    "false" => 0,
                    other => parse_number(other, line)? as u32,
                };
                if self.degrees != 0 && self.degrees != 90 {
                    return Err(AtlasError::new(
                        line,
                        format!("region `{}`: only 0 and 90 degree packing is supported", self.name),
                    ));
                }
            }
            // index, split and pad carry packer metadata we do not consume.
            _ => {}
        }
        Ok(())
    }

    fn finish(self, page_width: f32, page_height: f32) -> Result<AtlasRegion, AtlasError> {
        let (x, y) = self.xy.ok_or_else(|| {
            AtlasError::new(self.line, format!("region `{}` is missing xy/bounds", self.name))
        })?;
        let (width, height) = self.size.ok_or_else(|| {
            AtlasError::new(self.line, format!("region `{}` is missing size/bounds", self.name))
        })?;
        let (orig_width, orig_height) = self.orig.unwrap_or((width, height));
        let (offset_x, offset_y) = self.offset;
        let (footprint_w, footprint_h) = if self.degrees == 90 {
            (height, width)
        } else {
            (width, height)
        };
        Ok(AtlasRegion {
            name: self.name,
            u: x / page_width,
            v: y / page_height,
            u2: (x + footprint_w) / page_width,
            v2: (y + footprint_h) / page_height,
            degrees: self.degrees,
            width,
            height,
            orig_width,
            orig_height,
            offset_x,
            offset_y,
        })
    }
}

fn parse_pair(values: &[&str], line: usize) -> Result<(f32, f32), AtlasError> {
    if values.len() != 2 {
        return Err(AtlasError::new(line, "expected two comma separated values"));
    }
    Ok((parse_number(values[0], line)?, parse_number(values[1], line)?))
}

fn parse_quad(values: &[&str], line: usize) -> Result<(f32, f32, f32, f32), AtlasError> {
    if values.len() != 4 {
        return Err(AtlasError::new(line, "expected four comma separated values"));
    }
    Ok((
        parse_number(values[0], line)?,
        parse_number(values[1], line)?,
        parse_number(values[2], line)?,
        parse_number(values[3], line)?,
    ))
}

fn parse_number(text: &str, line: usize) -> Result<f32, AtlasError> {
    f32::from_str(text).map_err(|_| AtlasError::new(line, format!("`{}` is not a number", text)))
}

fn parse_bool(text: &str, line: usize) -> Result<bool, AtlasError> {
    match text {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(AtlasError::new(line, format!("`{}` is not a boolean", other))),
    }
}

fn parse_filter(text: &str, line: usize) -> Result<PageFilter, AtlasError> {
    if text.starts_with("MipMap") {
        return Ok(PageFilter::MipMap);
    }
    match text {
        "Nearest" => Ok(PageFilter::Nearest),
        "Linear" => Ok(PageFilter::Linear),
        other => Err(AtlasError::new(line, format!("unknown filter `{}`", other))),
    }
}
