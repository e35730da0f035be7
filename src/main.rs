/*

Voderberg and substitution tilings, rendered by recursive subdivision.

 */

// bunch of standard library stuff
use std::path::Path;
use std::fs::File;
use std::io::{BufRead, BufReader};
extern crate cairo;

//////////////////////////////////////////////////////////////////////
// use error chain so we can use Result<> everywhere
// for error handling

#[macro_use]
extern crate error_chain;

mod errors {

    error_chain!{

        foreign_links {
            Fmt(::std::fmt::Error);
            Io(::std::io::Error) #[cfg(unix)];
            Cairo(::cairo::Error);
            CairoIo(::cairo::IoError);
        }

    }

}

use errors::*;

//////////////////////////////////////////////////////////////////////
// define a statically allocated map for
// lookups during parsing

use phf::phf_map;

//////////////////////////////////////////////////////////////////////
// define some constants

const PI: f64 = std::f64::consts::PI;

const INCH: f64 = 72.0;

const PAGE_EDGE: f64 = 8.5 * INCH;

// deepest subdivision accepted from a pattern file - the per-sector
// shift divides by 2^(depth+1) and each sector has 4^depth leaf cells
const MAX_DEPTH: usize = 16;

// 12-step RYB color wheel as 0xRRGGBB
const PALETTE: [u32; 12] = [
    0xFE2712, 0xFC600A, 0xFB9902, 0xFCCC1A, 0xFEFE33, 0xB2D732,
    0x66B032, 0x347C98, 0x0247FE, 0x4424D6, 0x8601AF, 0xC21460
];

//////////////////////////////////////////////////////////////////////
// pull in some types from nalgebra

type Vec2d = nalgebra::Vector2<f64>;
type Vec3d = nalgebra::Vector3<f64>;
type Point2d = nalgebra::geometry::Point2<f64>;

//////////////////////////////////////////////////////////////////////
// complex arithmetic over Vec2d, reading (x, y) as x + iy.
// addition, scaling, negation, dot product and length all come
// straight from nalgebra and are not wrapped here.

// complex product
fn cmul(z: Vec2d, w: Vec2d) -> Vec2d {
    Vec2d::new(z.x*w.x - z.y*w.y, z.x*w.y + z.y*w.x)
}

// point on the unit circle at angle t
fn expi(t: f64) -> Vec2d {
    Vec2d::new(t.cos(), t.sin())
}

// rotate z about the origin
fn rotate(z: Vec2d, theta: f64) -> Vec2d {
    cmul(z, expi(theta))
}

// reflect p through the origin
fn cneg(p: &Point2d) -> Point2d {
    Point2d::new(-p.x, -p.y)
}

// reflect p across the y axis
fn xrefl(p: &Point2d) -> Point2d {
    Point2d::new(-p.x, p.y)
}

// midpoint of segment (a, b)
fn mid(a: &Point2d, b: &Point2d) -> Point2d {
    Point2d::from(0.5*(a.coords + b.coords))
}

// determinant of the 2x2 matrix with columns a, b
fn det2(a: Vec2d, b: Vec2d) -> f64 {
    a.x*b.y - a.y*b.x
}

//////////////////////////////////////////////////////////////////////
// barycentric coordinates relative to an ordered triangle (a, b, c).
//
// get_bary solves p = u*a + v*b + w*c with u + v + w = 1 by Cramer's
// rule after rebasing at a. collinear (a, b, c) makes the determinant
// zero and the result non-finite - callers keep their triangles
// non-degenerate, nothing is trapped here.

fn get_bary(p: &Point2d, a: &Point2d, b: &Point2d, c: &Point2d) -> Vec3d {

    let z = p - a;
    let b = b - a;
    let c = c - a;

    let d = det2(b, c);
    let q = det2(z, c)/d;
    let r = det2(b, z)/d;

    Vec3d::new(1.0 - q - r, q, r)

}

fn apply_bary(bary: &Vec3d, a: &Point2d, b: &Point2d, c: &Point2d) -> Point2d {

    Point2d::from(bary.x*a.coords + bary.y*b.coords + bary.z*c.coords)

}

//////////////////////////////////////////////////////////////////////
// the four tile families and their template polygons.
//
// each generator returns the outline stamped into every subdivided
// cell, as barycentric coordinates of the reference triangle
// a = (1, 0), b = (-1, 0), c = a + rotate(b - a, theta). the wedge
// map f(z) = a + rotate(z - a, theta) carries points across the
// sector boundary through a, so edges built from a point and its
// image under f match up between neighboring sectors.

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum TilingFamily {
    Triangle,
    Symmetric,
    Asymmetric,
    Voderberg
}

// lookup table matching pattern file keywords to tile families
static VALID_TILINGS: phf::Map<&'static str, TilingFamily> = phf_map! {
    "triangle" => TilingFamily::Triangle,
    "symmetric" => TilingFamily::Symmetric,
    "asymmetric" => TilingFamily::Asymmetric,
    "voderberg" => TilingFamily::Voderberg,
};

type Template = Vec<Vec3d>;

// template generator shared signature
type TemplateFunc = fn(f64, Option<Point2d>) -> Template;

// reference triangle every generator works against
fn reference_triangle(theta: f64) -> (Point2d, Point2d, Point2d) {

    let a = Point2d::new(1.0, 0.0);
    let b = Point2d::new(-1.0, 0.0);
    let c = a + rotate(b - a, theta);

    (a, b, c)

}

// plain triangular tiling - the reference triangle itself
fn triangle_template(_theta: f64, _control: Option<Point2d>) -> Template {

    vec![
        Vec3d::new(1.0, 0.0, 0.0),
        Vec3d::new(0.0, 1.0, 0.0),
        Vec3d::new(0.0, 0.0, 1.0)
    ]

}

// 7-gon with one free vertex x
fn asymmetric_template(theta: f64, control: Option<Point2d>) -> Template {

    let (a, b, c) = reference_triangle(theta);

    let f = |z: &Point2d| a + rotate(*z - a, theta);

    let x = control.unwrap_or(Point2d::new(0.5, 0.25));

    let s = [a, x, cneg(&x), b, c, f(&cneg(&x)), f(&x)];

    s.iter().map(|p| get_bary(p, &a, &b, &c)).collect()

}

// mirror-symmetric 9-gon with free vertices x and y. only x follows
// the control point; y keeps its default
fn symmetric_template(theta: f64, control: Option<Point2d>) -> Template {

    let (a, b, c) = reference_triangle(theta);

    let f = |z: &Point2d| a + rotate(*z - a, theta);

    let x = control.unwrap_or(Point2d::new(0.5, 0.25));
    let y = Point2d::new(0.0, 0.33);

    let s = [a, x, y, xrefl(&x), b, c, f(&xrefl(&x)), f(&y), f(&x)];

    s.iter().map(|p| get_bary(p, &a, &b, &c)).collect()

}

// the Voderberg enneagon. d mirrors c below the sector axis (note
// the negative angle), and the free vertex x sits at negative x, so
// a control point has its x coordinate negated
fn voderberg_template(theta: f64, control: Option<Point2d>) -> Template {

    let (a, b, c) = reference_triangle(theta);

    let f = |z: &Point2d| a + rotate(*z - a, theta);

    let d = a + rotate(b - a, -theta);

    let x = match control {
        Some(p) => Point2d::new(-p.x, p.y),
        None => Point2d::new(-0.533, 0.43)
    };

    let s = [a, cneg(&d), cneg(&x), x, d, b, f(&x), f(&cneg(&x)), f(&cneg(&d))];

    s.iter().map(|p| get_bary(p, &a, &b, &c)).collect()

}

impl TilingFamily {

    fn template(self, theta: f64, control: Option<Point2d>) -> Template {

        let tfunc: TemplateFunc = match self {
            TilingFamily::Triangle => triangle_template,
            TilingFamily::Symmetric => symmetric_template,
            TilingFamily::Asymmetric => asymmetric_template,
            TilingFamily::Voderberg => voderberg_template
        };

        tfunc(theta, control)

    }

}

//////////////////////////////////////////////////////////////////////
// palette lookup

// 0xRRGGBB -> rgb in [0, 1]
fn unpack_rgb(hex: u32) -> [f64; 3] {

    [
        ((hex >> 16) & 0xff) as f64 / 255.0,
        ((hex >> 8) & 0xff) as f64 / 255.0,
        (hex & 0xff) as f64 / 255.0
    ]

}

// reduce a leaf index to a palette entry. with six or fewer colors
// requested, take every other wheel entry for more hue separation
fn get_color(index: usize, ncolors: usize, color_offset: usize) -> [f64; 3] {

    debug_assert!(ncolors > 0);

    let mut index = index % ncolors;

    if ncolors <= 6 {
        index *= 2;
    }

    index += color_offset;

    unpack_rgb(PALETTE[index % PALETTE.len()])

}

//////////////////////////////////////////////////////////////////////
// resolved leaf polygons land here, one call per leaf cell.
// the cairo sink below fills and strokes; tests substitute a recorder

trait PolySink {
    fn poly(&mut self, points: &[Point2d], rgb: &[f64; 3]);
}

//////////////////////////////////////////////////////////////////////
// handy extensions to cairo context for our vector types

trait CairoVecOps {

    fn moveto(&self, p: &Point2d);
    fn lineto(&self, p: &Point2d);
    fn setcolor(&self, rgb: &[f64; 3]);
    fn drawpoly(&self, poly: &[Point2d]);

}

impl CairoVecOps for cairo::Context {

    fn moveto(&self, p: &Point2d) {
        self.move_to(p.x, p.y);
    }

    fn lineto(&self, p: &Point2d) {
        self.line_to(p.x, p.y);
    }

    fn setcolor(&self, rgb: &[f64; 3]) {
        self.set_source_rgb(rgb[0], rgb[1], rgb[2]);
    }

    fn drawpoly(&self, poly: &[Point2d]) {
        for (i, p) in poly.iter().enumerate() {
            if i == 0 {
                self.moveto(p);
            } else {
                self.lineto(p);
            }
        }
        self.close_path();
    }

}

struct CairoSink<'a> {
    ctx: &'a cairo::Context
}

impl<'a> PolySink for CairoSink<'a> {

    fn poly(&mut self, points: &[Point2d], rgb: &[f64; 3]) {

        self.ctx.setcolor(rgb);
        self.ctx.drawpoly(points);
        self.ctx.fill_preserve();

        self.ctx.set_source_rgb(0.0, 0.0, 0.0);
        self.ctx.stroke();

    }

}

macro_rules! with_save_restore {

    ($ctx:ident, { $($tree:tt)* }) => {

        $ctx.save();

        {

            $($tree)*

        }

        $ctx.restore();

    }

}

//////////////////////////////////////////////////////////////////////
// overengineered macro for parsing pattern files

macro_rules! parse_tokens {

    // finalizer - no more input to match, just error if remaining
    // input or return collected outputs
    ($it:ident { } -> { $($tuple:ident,)* } ) => (
        match $it.next() {
            Some(value) => Err(format!("found extra token(s) starting with \"{:}\"", value)),
            None => Ok(($($tuple),*))
        }
    );

    // string map
    ($it:ident { $name:ident from $map:expr, $($ts:tt)* } -> { $($tuple:ident,)* } ) => (
        match $it.next() {
            None => Err(format!("missing token for {:}", stringify!($name)) ),
            Some(&value) => {
                if let Some(&k) = $map.get(value) {
                    let $name = k;
                    parse_tokens!( $it { $($ts)* } -> { $($tuple,)* $name, } )
                } else {
                    let mut extended: Vec<&str> = Vec::new();
                    extended.extend($map.keys());
                    Err(format!("unexpected value \"{:}\" for {:}, expected one of: {{\"{:}\"}}",
                                value, stringify!($name), extended.join("\", \"") ))
                }
            }
        }
    );

    // name, type pair
    ($it:ident { $name:ident : $type:ident, $($ts:tt)* } -> { $($tuple:ident,)* } ) => (
        match $it.next() {
            None => Err(format!("missing token for {:}", stringify!($name)) ),
            Some(value) => if let Ok($name) = value.parse::<$type>() {
                parse_tokens!( $it { $($ts)* } -> { $($tuple,)* $name, } )
            } else {
                Err(format!("error parsing {:} as type {:}",
                            value, stringify!($type)))
            }
        }
    );

    // Entry point
    ($a:expr, { $($ts:tt)+ }) => (
        {
            let mut it = $a.iter();
            parse_tokens!( it { $($ts)* , } -> { } )
        }
    );

}

//////////////////////////////////////////////////////////////////////
// macros for inspecting/validating individual fields of TilingSpec

macro_rules! copy_field {

    ($dst:ident, $src:ident, $field:ident, $null:expr) => (
        if $src.$field != $null {
            if $dst.$field != $null {
                bail!("{:} is already set", stringify!($field));
            }
            $dst.$field = $src.$field;
        }
    );

    ($dst:ident, $src:ident, $field:ident) => (
        if $src.$field.is_some() {
            if $dst.$field.is_some() {
                bail!("{:} is already set", stringify!($field));
            }
            $dst.$field = $src.$field;
        }
    )

}

macro_rules! ensure_field {

    ($ts:ident, $fvec:ident, $field:ident, $null:expr) => (
        if $ts.$field == $null {
            $fvec.push(stringify!($field));
        }
    )

}

//////////////////////////////////////////////////////////////////////
// pattern file specification for one tiling

#[derive(Debug)]
struct TilingSpec {

    family: Option<TilingFamily>,   // which of the four tile outlines
    sectors: usize,                 // wedges per half turn, theta = PI/sectors
    depth: usize,                   // subdivision recursion depth
    ncolors: usize,                 // colors cycled through leaf cells
    color_offset: usize,            // rotation of the color wheel
    offset: Option<f64>,            // x shift pulling the half planes apart
    zoom: Option<f64>,              // exponential magnification step
    control_point: Option<Point2d>, // free template vertex, viewport fractions
    raster_size: Option<usize>      // also write a square png this many pixels across

}

impl TilingSpec {

    fn new() -> TilingSpec {
        TilingSpec {
            family: None,
            sectors: usize::MAX,
            depth: usize::MAX,
            ncolors: usize::MAX,
            color_offset: usize::MAX,
            offset: None,
            zoom: None,
            control_point: None,
            raster_size: None
        }
    }

    fn update(&mut self, other: TilingSpec) -> Result<()> {

        copy_field!(self, other, family);
        copy_field!(self, other, sectors, usize::MAX);
        copy_field!(self, other, depth, usize::MAX);
        copy_field!(self, other, ncolors, usize::MAX);
        copy_field!(self, other, color_offset, usize::MAX);
        copy_field!(self, other, offset);
        copy_field!(self, other, zoom);
        copy_field!(self, other, control_point);
        copy_field!(self, other, raster_size);

        Ok(())

    }

    fn parse_keyword(keyword: &str, rest: &[&str]) -> Result<TilingSpec> {

        let mut update = TilingSpec::new();

        match keyword {

            "tiling" => {

                let family = parse_tokens!(rest, { family from VALID_TILINGS })?;

                update.family = Some(family);

            },

            "sectors" => {

                let n = parse_tokens!(rest, { n: usize })?;

                update.sectors = n;

            },

            "depth" => {

                let d = parse_tokens!(rest, { d: usize })?;

                update.depth = d;

            },

            "colors" => {

                let n = parse_tokens!(rest, { n: usize })?;

                update.ncolors = n;

            },

            "color_offset" => {

                let n = parse_tokens!(rest, { n: usize })?;

                update.color_offset = n;

            },

            "offset" => {

                let x = parse_tokens!(rest, { x: f64 })?;

                update.offset = Some(x);

            },

            "zoom" => {

                let z = parse_tokens!(rest, { z: f64 })?;

                update.zoom = Some(z);

            },

            "control_point" => {

                let (x, y) = parse_tokens!(rest, { x: f64, y: f64 })?;

                update.control_point = Some(Point2d::new(x, y));

            },

            "raster_size" => {

                let px = parse_tokens!(rest, { px: usize })?;

                update.raster_size = Some(px);

            },

            _ => {
                bail!("unrecognized keyword");
            }

        };

        Ok(update)

    }

    fn update_from(&mut self, line: &str) -> Result<()> {

        let mut trimmed = line.trim();

        if let Some(pos) = trimmed.find('#') {
            trimmed = &trimmed[0..pos];
        }

        if trimmed.len() == 0 {
            return Ok(());
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();

        let keyword = tokens[0];
        let rest = &tokens[1..];

        let update = Self::parse_keyword(keyword, rest).chain_err(
            || format!("while parsing keyword {:}", keyword))?;

        self.update(update)

    }

    fn parse(filename: &str, istr: &mut impl BufRead) -> Result<TilingSpec> {

        let mut ts = TilingSpec::new();
        let mut lineno = 0;

        loop {

            let mut line = String::new();

            lineno += 1;

            let len = istr.read_line(&mut line).chain_err(|| format!("{:}:{:}: read error", filename, lineno))?;

            if len == 0 {
                break;
            }

            ts.update_from(line.as_str()).chain_err(|| format!("{:}:{:}: parse error", filename, lineno))?;

        }

        let mut unset_fields = Vec::new();

        ensure_field!(ts, unset_fields, family, None);

        if !unset_fields.is_empty() {
            bail!("{:}: the following field(s) were unset: {:}",
                  filename, unset_fields.as_slice().join(", "));
        }

        Ok(ts)

    }

}

//////////////////////////////////////////////////////////////////////
// a validated tiling ready to render: defaults applied, theta and
// the template polygon computed once per render pass

struct Tiling {

    family: TilingFamily,
    sectors: usize,
    depth: usize,
    ncolors: usize,
    color_offset: usize,
    offset: f64,
    zoom: f64,
    theta: f64,
    template: Template

}

impl Tiling {

    fn new(ts: &TilingSpec) -> Result<Tiling> {

        let family = match ts.family {
            Some(family) => family,
            None => bail!("no tiling family set")
        };

        let sectors = if ts.sectors == usize::MAX { 12 } else { ts.sectors };
        let depth = if ts.depth == usize::MAX { 2 } else { ts.depth };
        let ncolors = if ts.ncolors == usize::MAX { 3 } else { ts.ncolors };
        let color_offset = if ts.color_offset == usize::MAX { 0 } else { ts.color_offset };

        if sectors < 1 {
            bail!("sectors must be at least 1");
        }

        if ncolors < 1 {
            bail!("colors must be at least 1");
        }

        if depth > MAX_DEPTH {
            bail!("depth must be at most {:}", MAX_DEPTH);
        }

        let theta = PI/(sectors as f64);

        let template = family.template(theta, ts.control_point);

        Ok(Tiling {
            family: family,
            sectors: sectors,
            depth: depth,
            ncolors: ncolors,
            color_offset: color_offset,
            offset: ts.offset.unwrap_or(0.0),
            zoom: ts.zoom.unwrap_or(0.0),
            theta: theta,
            template: template
        })

    }

    // stamp the template into triangle (a, b, c) as one leaf cell
    fn stamp(&self, sink: &mut dyn PolySink,
             a: &Point2d, b: &Point2d, c: &Point2d,
             index: usize) {

        let points: Vec<Point2d> = self.template.iter().map(
            |bary| apply_bary(bary, a, b, c)).collect();

        sink.poly(&points, &get_color(index, self.ncolors, self.color_offset));

    }

    // walk the subdivision tree below (a, b, c). each split hands
    // its four children the color sub-slots index*4 + 0..3
    fn subdivide(&self, sink: &mut dyn PolySink,
                 a: &Point2d, b: &Point2d, c: &Point2d,
                 level: usize, index: usize) {

        if level == 0 {
            self.stamp(sink, a, b, c, index);
            return;
        }

        let index = index*4;

        let ab = mid(a, b);
        let bc = mid(b, c);
        let ca = mid(c, a);

        if self.family == TilingFamily::Symmetric && level == 1 {

            // the final split of this family draws its children
            // immediately, with these exact vertex orders
            self.stamp(sink, a, &ab, &ca, index + 0);
            self.stamp(sink, &ab, &bc, b, index + 1);
            self.stamp(sink, &bc, &ca, &ab, index + 2);
            self.stamp(sink, &ca, c, &bc, index + 3);

        } else {

            self.subdivide(sink, a, &ab, &ca, level - 1, index + 0);
            self.subdivide(sink, &ab, b, &bc, level - 1, index + 1);
            self.subdivide(sink, &bc, &ca, &ab, level - 1, index + 2);
            self.subdivide(sink, &ca, &bc, c, level - 1, index + 3);

        }

    }

    // one full render pass: 2*sectors wedges around the origin, the
    // second half turn sweeping below the x axis
    fn render(&self, sink: &mut dyn PolySink) {

        let n = self.sectors;

        for i in 0..2*n {

            let mut a = Point2d::origin();
            let mut b = Point2d::from(expi((i as f64)*self.theta));
            let mut c = Point2d::from(expi((i as f64 + 1.0)*self.theta));

            // an odd offset reverses the winding of the mirrored half
            if self.family == TilingFamily::Symmetric
                && self.offset % 2.0 == 1.0
                && i >= n {
                std::mem::swap(&mut b, &mut c);
            }

            let sign = if i < n { -1.0 } else { 1.0 };
            let off = sign * self.offset / ((1u64 << (self.depth + 1)) as f64);

            a.x += off;
            b.x += off;
            c.x += off;

            self.subdivide(sink, &a, &b, &c, self.depth, i);

        }

    }

}

//////////////////////////////////////////////////////////////////////
// cairo page setup: origin at the center, y up, unit circle spanning
// the page height, exponential zoom on top

fn render_to_context(ctx: &cairo::Context, tiling: &Tiling,
                     width: f64, height: f64) {

    with_save_restore!(ctx, {

        ctx.translate(0.5*width, 0.5*height);
        ctx.scale(0.5*height, -0.5*height);

        let scale = (0.1*tiling.zoom).exp();
        ctx.scale(scale, scale);

        // hairline strokes no matter how deep the zoom goes
        let px = 2.0/height;
        ctx.set_line_width(px/scale);
        ctx.set_line_join(cairo::LineJoin::Round);

        let mut sink = CairoSink { ctx: ctx };

        tiling.render(&mut sink);

    });

}

fn write_pdf(pdffile: &str, tiling: &Tiling) -> Result<()> {

    let surface = cairo::PdfSurface::new(PAGE_EDGE, PAGE_EDGE, pdffile)?;

    let ctx = cairo::Context::new(&surface);

    render_to_context(&ctx, tiling, PAGE_EDGE, PAGE_EDGE);

    ctx.show_page();

    Ok(())

}

fn write_png(pngfile: &str, tiling: &Tiling, size: usize) -> Result<()> {

    let surface = cairo::ImageSurface::create(
        cairo::Format::ARgb32, size as i32, size as i32)?;

    let ctx = cairo::Context::new(&surface);

    ctx.set_source_rgb(1.0, 1.0, 1.0);
    ctx.paint();

    render_to_context(&ctx, tiling, size as f64, size as f64);

    drop(ctx);

    let mut f = File::create(pngfile)?;

    surface.write_to_png(&mut f)?;

    Ok(())

}

//////////////////////////////////////////////////////////////////////

fn run() -> Result<()> {

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("usage: {:?} PATTERNFILE", args[0]);
        std::process::exit(1);
    }

    let filename = Path::new(&args[1]);

    let basename = match filename.file_stem() {
        None => "output",
        Some(os_str) => os_str.to_str().unwrap_or("output")
    };

    let pdffile = basename.to_owned() + ".pdf";

    let f = File::open(filename)?;
    let mut reader = BufReader::new(f);

    let ts = TilingSpec::parse(&args[1], &mut reader)?;

    let tiling = Tiling::new(&ts)?;

    write_pdf(&pdffile, &tiling)?;

    println!("wrote {:}", pdffile);

    if let Some(size) = ts.raster_size {

        let pngfile = basename.to_owned() + ".png";

        write_png(&pngfile, &tiling, size)?;

        println!("wrote {:}", pngfile);

    }

    Ok(())

}

quick_main!(run);

//////////////////////////////////////////////////////////////////////
