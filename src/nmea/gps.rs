//! GGA/RMC/GLL own-ship position parsing, translated from
//! `Source/Marine/NMEA.cpp`'s `processGGA`/`processRMC`/`processGLL`.

use crate::error::{Error, Result};
use crate::frame::Gps;

fn to_decimal(coord: &str, quadrant: u8) -> Result<f32> {
    if coord.len() <= 5 {
        return Err(Error::Protocol("GPS coordinate too short".into()));
    }
    let digits = if coord.as_bytes()[4] == b'.' { 2 } else { 3 };
    let degrees: f32 = coord[..digits]
        .parse()
        .map_err(|_| Error::Protocol("bad GPS degrees".into()))?;
    let minutes: f32 = coord[digits..]
        .parse()
        .map_err(|_| Error::Protocol("bad GPS minutes".into()))?;
    let mut v = degrees + minutes / 60.0;
    if quadrant == b'W' || quadrant == b'S' {
        v = -v;
    }
    Ok(v)
}

/// `$GPGGA,time,lat,N/S,lon,E/W,fix,...*XX`.
pub fn parse_gga(s: &str) -> Result<Gps> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 15 {
        return Err(Error::Protocol(format!(
            "GGA does not have 15 parts but {}",
            parts.len()
        )));
    }
    let fix: i32 = parts[6].trim().parse().unwrap_or(0);
    if fix != 1 && fix != 2 {
        return Err(Error::Protocol(format!("no fix in GGA: {}", parts[6])));
    }
    let lat_quad = parts[3].trim().as_bytes().first().copied();
    let lon_quad = parts[5].trim().as_bytes().first().copied();
    let (Some(lat_quad), Some(lon_quad)) = (lat_quad, lon_quad) else {
        return Err(Error::Protocol("GGA missing hemisphere field".into()));
    };
    Ok(Gps {
        lat: to_decimal(parts[2].trim(), lat_quad)?,
        lon: to_decimal(parts[4].trim(), lon_quad)?,
        source_nmea: s.to_string(),
        source_json: String::new(),
    })
}

/// `$GPRMC,time,status,lat,N/S,lon,E/W,...*XX`.
pub fn parse_rmc(s: &str) -> Result<Gps> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() < 12 || parts.len() > 14 {
        return Err(Error::Protocol("RMC has the wrong number of parts".into()));
    }
    let lat_quad = parts[4].trim().as_bytes().first().copied();
    let lon_quad = parts[6].trim().as_bytes().first().copied();
    let (Some(lat_quad), Some(lon_quad)) = (lat_quad, lon_quad) else {
        return Err(Error::Protocol("RMC has no coordinates".into()));
    };
    Ok(Gps {
        lat: to_decimal(parts[3].trim(), lat_quad)?,
        lon: to_decimal(parts[5].trim(), lon_quad)?,
        source_nmea: s.to_string(),
        source_json: String::new(),
    })
}

/// `$GPGLL,lat,N/S,lon,E/W,time,status*XX`.
pub fn parse_gll(s: &str) -> Result<Gps> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 8 {
        return Err(Error::Protocol(format!(
            "GLL does not have 8 parts but {}",
            parts.len()
        )));
    }
    let lat_quad = parts[2].trim().as_bytes().first().copied();
    let lon_quad = parts[4].trim().as_bytes().first().copied();
    let (Some(lat_quad), Some(lon_quad)) = (lat_quad, lon_quad) else {
        return Err(Error::Protocol("GLL missing hemisphere field".into()));
    };
    Ok(Gps {
        lat: to_decimal(parts[1].trim(), lat_quad)?,
        lon: to_decimal(parts[3].trim(), lon_quad)?,
        source_nmea: s.to_string(),
        source_json: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gga_fix() {
        let s = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let gps = parse_gga(s).unwrap();
        assert!((gps.lat - 48.1173).abs() < 0.01);
        assert!((gps.lon - 11.5167).abs() < 0.01);
    }

    #[test]
    fn rejects_gga_without_fix() {
        let s = "$GPGGA,123519,4807.038,N,01131.000,E,0,08,0.9,545.4,M,46.9,M,,*47";
        assert!(parse_gga(s).is_err());
    }

    #[test]
    fn southern_western_hemisphere_negates() {
        let s = "$GPGLL,3356.00,S,15113.00,E,123519,A*2C";
        let gps = parse_gll(s).unwrap();
        assert!(gps.lat < 0.0);
    }
}
