use crate::location::LocationService;

pub struct AppState {
    pub service: LocationService,
}
