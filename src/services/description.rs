//! Image description generation.

use async_trait::async_trait;

/// Produces a text description for uploaded image bytes.
///
/// Implementations must not fail; when nothing useful can be said they return
/// an empty string.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync + 'static {
    async fn describe(&self, image: &[u8], content_type: Option<&str>) -> String;
}

const MOCK_DESCRIPTIONS: [&str; 10] = [
    "A serene mountain landscape with a clear blue lake reflecting the snowy peaks.",
    "A bustling city street at night, illuminated by neon signs and headlights.",
    "A cozy reading nook with a large armchair, a blanket, and bookshelves filled with books.",
    "A golden sunset over a vast desert, with sand dunes casting long shadows.",
    "A futuristic cityscape with towering skyscrapers and flying vehicles in the sky.",
    "A peaceful forest path surrounded by tall trees with sunlight streaming through the canopy.",
    "A close-up of a tiger prowling through the jungle, its eyes glowing with intensity.",
    "A quaint village nestled in a valley, with stone houses and smoke rising from chimneys.",
    "A vibrant coral reef underwater, teeming with colorful fish and marine life.",
    "An astronaut floating in space, with Earth visible in the background.",
];

/// Stand-in generator that picks a canned description from the MD5 of the
/// image bytes, so identical uploads always get the same text.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockDescriptionGenerator;

#[async_trait]
impl DescriptionGenerator for MockDescriptionGenerator {
    async fn describe(&self, image: &[u8], _content_type: Option<&str>) -> String {
        let digest = md5::compute(image);
        let index = usize::from(digest[0]) % MOCK_DESCRIPTIONS.len();
        MOCK_DESCRIPTIONS[index].to_string()
    }
}
