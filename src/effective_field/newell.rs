// src/effective_field/newell.rs
//
// Newell's analytical demagnetising tensor for rectangular cells.
//
// N_ij(r) is the cell-averaged field response between two identical cells whose
// centres are displaced by r, with H = -N M. Lengths are in units of the cell
// (normalised so the largest edge is 1); N is dimensionless.
//
// Reference: A. J. Newell, W. Williams, D. J. Dunlop, "A generalization of the
// demagnetizing tensor for nonuniform magnetization", JGR 98 (1993).

use std::f64::consts::PI;

/// Displacements (in largest-edge units) beyond which the point-dipole form is used.
pub const ASYMPTOTIC_RADIUS: f64 = 32.0;

/// Compensated sum, adding terms in order of increasing magnitude.
///
/// The 27-point stencils cancel large terms against each other; a naive sum
/// loses most significant digits at moderate distances.
fn accurate_sum(terms: &mut [f64]) -> f64 {
    terms.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    let mut sum = 0.0;
    let mut corr = 0.0;
    for &x in terms.iter() {
        let t = sum + x;
        if sum.abs() >= x.abs() {
            corr += (sum - t) + x;
        } else {
            corr += (x - t) + sum;
        }
        sum = t;
    }
    sum + corr
}

/// Newell's f(x, y, z), even in every argument.
pub fn newell_f(x: f64, y: f64, z: f64) -> f64 {
    let (x, y, z) = (x.abs(), y.abs(), z.abs());
    let (xsq, ysq, zsq) = (x * x, y * y, z * z);
    let rsq = xsq + ysq + zsq;
    if rsq <= 0.0 {
        return 0.0;
    }
    let r = rsq.sqrt();

    let mut piece = [0.0; 4];
    let mut n = 0;
    let mut push = |v: f64| {
        piece[n] = v;
        n += 1;
    };
    if z > 0.0 {
        push(2.0 * (2.0 * xsq - ysq - zsq) * r);
        let xyz = x * y * z;
        if xyz > 0.0 {
            push(-12.0 * xyz * (y * z).atan2(x * r));
        }
        let xz = xsq + zsq;
        if y > 0.0 && xz > 0.0 {
            push(3.0 * y * (zsq - xsq) * ((y + r) * (y + r) / xz).ln());
        }
        let xy = xsq + ysq;
        if xy > 0.0 {
            push(3.0 * z * (ysq - xsq) * ((z + r) * (z + r) / xy).ln());
        }
    } else if x == y {
        let k = 2.0 * 2.0_f64.sqrt() - 6.0 * (1.0 + 2.0_f64.sqrt()).ln();
        push(k * xsq * x);
    } else {
        push(2.0 * (2.0 * xsq - ysq) * r);
        if y > 0.0 && x > 0.0 {
            push(-6.0 * y * xsq * ((y + r) / x).ln());
        }
    }
    accurate_sum(&mut piece[..n]) / 12.0
}

/// Newell's g(x, y, z): odd in x and y, even in z.
pub fn newell_g(x: f64, y: f64, z: f64) -> f64 {
    let mut sign = 1.0;
    if x < 0.0 {
        sign = -sign;
    }
    if y < 0.0 {
        sign = -sign;
    }
    let (x, y, z) = (x.abs(), y.abs(), z.abs());
    let (xsq, ysq, zsq) = (x * x, y * y, z * z);
    let rsq = xsq + ysq + zsq;
    if rsq <= 0.0 {
        return 0.0;
    }
    let r = rsq.sqrt();

    let mut piece = [0.0; 7];
    let mut n = 0;
    let mut push = |v: f64| {
        piece[n] = v;
        n += 1;
    };
    push(-2.0 * x * y * r);
    if z > 0.0 {
        push(-z * zsq * (x * y).atan2(z * r));
        push(-3.0 * z * ysq * (x * z).atan2(y * r));
        push(-3.0 * z * xsq * (y * z).atan2(x * r));
        let xy = xsq + ysq;
        if xy > 0.0 {
            push(3.0 * x * y * z * ((z + r) * (z + r) / xy).ln());
        }
        let yz = ysq + zsq;
        if yz > 0.0 {
            push(0.5 * y * (3.0 * zsq - ysq) * ((x + r) * (x + r) / yz).ln());
        }
        let xz = xsq + zsq;
        if xz > 0.0 {
            push(0.5 * x * (3.0 * zsq - xsq) * ((y + r) * (y + r) / xz).ln());
        }
    } else {
        if y > 0.0 {
            push(-y * ysq * ((x + r) / y).ln());
        }
        if x > 0.0 {
            push(-x * xsq * ((y + r) / x).ln());
        }
    }
    sign * accurate_sum(&mut piece[..n]) / 6.0
}

/// Self-demagnetising factor Nxx of an x × y × z prism. Cubes give exactly 1/3.
pub fn self_demag_nx(x: f64, y: f64, z: f64) -> f64 {
    if x <= 0.0 || y <= 0.0 || z <= 0.0 {
        return 0.0;
    }
    if x == y && y == z {
        return 1.0 / 3.0;
    }
    let (xsq, ysq, zsq) = (x * x, y * y, z * z);
    let r = (xsq + ysq + zsq).sqrt();
    let rxy = (xsq + ysq).sqrt();
    let rxz = (xsq + zsq).sqrt();
    let ryz = (ysq + zsq).sqrt();

    let mut arr = [0.0; 8];
    arr[0] = 2.0 * x * y * z
        * ((x / (x + rxy) + (2.0 * xsq + ysq + zsq) / (r * rxy + x * rxz)) / (x + rxz)
            + (x / (x + rxz) + (2.0 * xsq + ysq + zsq) / (r * rxz + x * rxy)) / (x + rxy))
        / ((x + r) * (rxy + rxz + r));
    arr[1] = -x * y * z
        * ((y / (y + rxy) + (2.0 * ysq + xsq + zsq) / (r * rxy + y * ryz)) / (y + ryz)
            + (y / (y + ryz) + (2.0 * ysq + xsq + zsq) / (r * ryz + y * rxy)) / (y + rxy))
        / ((y + r) * (rxy + ryz + r));
    arr[2] = -x * y * z
        * ((z / (z + rxz) + (2.0 * zsq + xsq + ysq) / (r * rxz + z * ryz)) / (z + ryz)
            + (z / (z + ryz) + (2.0 * zsq + xsq + ysq) / (r * ryz + z * rxz)) / (z + rxz))
        / ((z + r) * (rxz + ryz + r));
    arr[3] = 6.0 * (y * z / (x * r)).atan();

    let p4 = -y * z * z * (1.0 / (x + rxz) + y / (rxy * rxz + x * r)) / (rxz * (y + rxy));
    arr[4] = if p4 > -0.5 {
        3.0 * x * p4.ln_1p() / z
    } else {
        3.0 * x * (x * (y + r) / (rxz * (y + rxy))).ln() / z
    };
    let p5 = -y * y * z * (1.0 / (x + rxy) + z / (rxy * rxz + x * r)) / (rxy * (z + rxz));
    arr[5] = if p5 > -0.5 {
        3.0 * x * p5.ln_1p() / y
    } else {
        3.0 * x * (x * (z + r) / (rxy * (z + rxz))).ln() / y
    };
    let p6 = -xsq * z * (1.0 / (y + rxy) + z / (rxy * ryz + y * r)) / (rxy * (z + ryz));
    arr[6] = if p6 > -0.5 {
        -3.0 * y * p6.ln_1p() / x
    } else {
        -3.0 * y * (y * (z + r) / (rxy * (z + ryz))).ln() / x
    };
    let p7 = -xsq * y * (1.0 / (z + rxz) + y / (rxz * ryz + z * r)) / (rxz * (y + ryz));
    arr[7] = if p7 > -0.5 {
        -3.0 * z * p7.ln_1p() / x
    } else {
        -3.0 * z * (z * (y + r) / (rxz * (y + ryz))).ln() / x
    };
    accurate_sum(&mut arr) / (3.0 * PI)
}

// 27-point second-difference stencil weights: +8 centre, -4 faces, +2 edges, -1 corners.
#[inline]
fn stencil_weight(a: i32, b: i32, c: i32) -> f64 {
    match a.abs() + b.abs() + c.abs() {
        0 => 8.0,
        1 => -4.0,
        2 => 2.0,
        _ => -1.0,
    }
}

fn stencil(f: fn(f64, f64, f64) -> f64, x: f64, y: f64, z: f64, dx: f64, dy: f64, dz: f64) -> f64 {
    let mut terms = [0.0; 27];
    let mut n = 0;
    for a in -1..=1 {
        for b in -1..=1 {
            for c in -1..=1 {
                let w = stencil_weight(a, b, c);
                terms[n] = w * f(x + a as f64 * dx, y + b as f64 * dy, z + c as f64 * dz);
                n += 1;
            }
        }
    }
    accurate_sum(&mut terms)
}

/// 4πV·Nxx at displacement (x, y, z).
fn sda00(x: f64, y: f64, z: f64, dx: f64, dy: f64, dz: f64) -> f64 {
    if x == 0.0 && y == 0.0 && z == 0.0 {
        return self_demag_nx(dx, dy, dz) * 4.0 * PI * dx * dy * dz;
    }
    stencil(newell_f, x, y, z, dx, dy, dz)
}

/// 4πV·Nxy at displacement (x, y, z).
fn sda01(x: f64, y: f64, z: f64, dx: f64, dy: f64, dz: f64) -> f64 {
    if x == 0.0 || y == 0.0 {
        return 0.0;
    }
    stencil(newell_g, x, y, z, dx, dy, dz)
}

/// Symmetric tensor components, ordered xx, yy, zz, yz, xz, xy.
pub type Tensor6 = [f64; 6];

pub const XX: usize = 0;
pub const YY: usize = 1;
pub const ZZ: usize = 2;
pub const YZ: usize = 3;
pub const XZ: usize = 4;
pub const XY: usize = 5;

/// Point-dipole tensor N_ij = -V/(4π R^5) (3 r_i r_j - R^2 δ_ij).
pub fn dipole_tensor(r: [f64; 3], cell: [f64; 3]) -> Tensor6 {
    let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
    let r5 = r2 * r2 * r2.sqrt();
    let pref = -cell[0] * cell[1] * cell[2] / (4.0 * PI * r5);
    [
        pref * (3.0 * r[0] * r[0] - r2),
        pref * (3.0 * r[1] * r[1] - r2),
        pref * (3.0 * r[2] * r[2] - r2),
        pref * 3.0 * r[1] * r[2],
        pref * 3.0 * r[0] * r[2],
        pref * 3.0 * r[0] * r[1],
    ]
}

/// Demag tensor between cells displaced by `r`, for cells of size `cell`.
///
/// Both are in the same (normalised) length unit.
pub fn demag_tensor(r: [f64; 3], cell: [f64; 3]) -> Tensor6 {
    let [x, y, z] = r;
    let [dx, dy, dz] = cell;
    let dist = (x * x + y * y + z * z).sqrt();
    if dist > ASYMPTOTIC_RADIUS {
        return dipole_tensor(r, cell);
    }
    let scale = 1.0 / (4.0 * PI * dx * dy * dz);
    [
        scale * sda00(x, y, z, dx, dy, dz),
        scale * sda00(y, x, z, dy, dx, dz),
        scale * sda00(z, y, x, dz, dy, dx),
        scale * sda01(y, z, x, dy, dz, dx),
        scale * sda01(x, z, y, dx, dz, dy),
        scale * sda01(x, y, z, dx, dy, dz),
    ]
}
