use crate::models::order::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Straight-line to road distance correction.
pub const ROAD_FACTOR: f64 = 1.3;

const DEFAULT_PLANNING_SPEED_KMH: f64 = 30.0;
const MIN_PLANNED_DURATION_MINUTES: u32 = 10;

/// Below this a reported speed means "stopped or unreliable".
pub const MIN_RELIABLE_SPEED_KMH: f64 = 5.0;
pub const DEFAULT_URBAN_SPEED_KMH: f64 = 25.0;
const MIN_LIVE_ETA_MINUTES: u32 = 1;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    // Rounding can push this a hair above 1 for antipodal points.
    let haversine = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng).clamp(0.0, 1.0);
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn road_distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * ROAD_FACTOR
}

/// Planned trip duration for quotes. Never below ten minutes.
pub fn estimate_duration_minutes(distance_km: f64, avg_speed_kmh: Option<f64>) -> u32 {
    let speed = match avg_speed_kmh {
        Some(speed) if speed > 0.0 => speed,
        _ => DEFAULT_PLANNING_SPEED_KMH,
    };

    whole_minutes(distance_km, speed).max(MIN_PLANNED_DURATION_MINUTES)
}

/// ETA for a courier already on the road. Never below one minute.
pub fn live_eta_minutes(distance_km: f64, reported_speed_kmh: Option<f64>) -> u32 {
    let speed = match reported_speed_kmh {
        Some(speed) if speed >= MIN_RELIABLE_SPEED_KMH => speed,
        _ => DEFAULT_URBAN_SPEED_KMH,
    };

    whole_minutes(distance_km, speed).max(MIN_LIVE_ETA_MINUTES)
}

fn whole_minutes(distance_km: f64, speed_kmh: f64) -> u32 {
    let minutes = (distance_km.max(0.0) / speed_kmh * 60.0).floor();
    if minutes.is_finite() {
        minutes.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{estimate_duration_minutes, haversine_km, live_eta_minutes, road_distance_km};
    use crate::models::order::GeoPoint;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = point(-15.4167, 28.2833);
        assert!(haversine_km(&p, &p) < 1e-9);
        assert!(road_distance_km(&p, &p) < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = point(51.5074, -0.1278);
        let paris = point(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (point(-15.42, 28.28), point(-15.4167, 28.2833)),
            (point(53.5511, 9.9937), point(-33.8688, 151.2093)),
            (point(89.9, 0.0), point(-89.9, 180.0)),
        ];

        for (a, b) in pairs {
            let forward = road_distance_km(&a, &b);
            let backward = road_distance_km(&b, &a);
            assert!((forward - backward).abs() < 1e-9);
        }
    }

    #[test]
    fn antipodal_points_give_half_circumference() {
        let distance = haversine_km(&point(0.0, 0.0), &point(0.0, 180.0));
        assert!(distance.is_finite());
        assert!((distance - std::f64::consts::PI * 6_371.0).abs() < 1e-6);
    }

    #[test]
    fn road_distance_applies_correction_factor() {
        let a = point(-15.42, 28.28);
        let b = point(-15.38, 28.32);
        assert!((road_distance_km(&a, &b) - haversine_km(&a, &b) * 1.3).abs() < 1e-9);
    }

    #[test]
    fn planned_duration_has_ten_minute_floor() {
        assert_eq!(estimate_duration_minutes(0.0, None), 10);
        assert_eq!(estimate_duration_minutes(1.0, Some(60.0)), 10);
        assert_eq!(estimate_duration_minutes(15.0, None), 30);
        assert_eq!(estimate_duration_minutes(15.0, Some(0.0)), 30);
        assert_eq!(estimate_duration_minutes(40.0, Some(40.0)), 60);
    }

    #[test]
    fn live_eta_replaces_unreliable_speed() {
        assert_eq!(live_eta_minutes(5.0, None), 12);
        assert_eq!(live_eta_minutes(5.0, Some(3.0)), 12);
        assert_eq!(live_eta_minutes(5.0, Some(50.0)), 6);
    }

    #[test]
    fn live_eta_has_one_minute_floor() {
        assert_eq!(live_eta_minutes(0.0, None), 1);
        assert_eq!(live_eta_minutes(0.01, Some(80.0)), 1);
    }
}
