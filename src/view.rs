use std::fmt;

use log::{debug, info, warn};

use crate::story::{NodeId, StoryDocument, StoryError, StoryNode, StoryOption};

// ---------------------------------------------------------------------------
// Image state
// ---------------------------------------------------------------------------

/// Tags an image request with the visit it was issued for.
///
/// `visit` grows on every cursor move, so a response for a node the player
/// left and came back to is still recognised as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    pub node: NodeId,
    pub visit: u64,
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.visit)
    }
}

/// Per-visit state of the generated scene image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageState {
    #[default]
    Idle,
    Loading(RequestToken),
    Ready(String),
}

/// What the caller should send to the image backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRequest {
    pub token: RequestToken,
    pub scene_description: String,
}

/// Result of handing an image response back to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageUpdate {
    /// The image is now shown.
    Applied,
    /// The request for the current scene failed; the message is for the player.
    Failed(String),
    /// The player has moved on since the request was issued.
    Stale,
}

// ---------------------------------------------------------------------------
// Derived rendering state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Winning,
    Losing,
}

impl Ending {
    pub fn headline(self) -> &'static str {
        match self {
            Ending::Winning => "Congratulations!",
            Ending::Losing => "The End",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Ending::Winning => "You reached a winning ending!",
            Ending::Losing => "Your adventure has ended.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outlet<'a> {
    Ending(Ending),
    Choices(&'a [StoryOption]),
}

/// Everything needed to draw the current node.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub title: &'a str,
    pub node: &'a StoryNode,
    pub outlet: Outlet<'a>,
    pub image: &'a ImageState,
}

impl Scene<'_> {
    pub fn options(&self) -> &[StoryOption] {
        match self.outlet {
            Outlet::Choices(options) => options,
            Outlet::Ending(_) => &[],
        }
    }

    pub fn ending(&self) -> Option<Ending> {
        match self.outlet {
            Outlet::Ending(ending) => Some(ending),
            Outlet::Choices(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    /// No story has been handed to the view yet.
    Loading,
    Scene(Scene<'a>),
}

// ---------------------------------------------------------------------------
// Story view
// ---------------------------------------------------------------------------

/// Cursor over a read-only story document.
///
/// The view stores only the current node id, a visit counter and the image
/// state; everything shown is derived from `(story, current)` on demand.
#[derive(Debug, Default)]
pub struct StoryView {
    story: Option<StoryDocument>,
    current: Option<NodeId>,
    visit: u64,
    image: ImageState,
}

impl StoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_story(story: StoryDocument) -> Self {
        let mut view = Self::new();
        view.load(story);
        view
    }

    /// Bind a new document and put the cursor on its root.
    pub fn load(&mut self, story: StoryDocument) {
        info!(
            "Story loaded: '{}' ({} nodes, root={})",
            story.title,
            story.nodes.len(),
            story.root_node_id
        );
        let root = story.root_node_id.clone();
        self.story = Some(story);
        self.move_to(root);
    }

    pub fn current_node_id(&self) -> Option<&NodeId> {
        self.current.as_ref()
    }

    pub fn image(&self) -> &ImageState {
        &self.image
    }

    pub fn current_node(&self) -> Result<&StoryNode, StoryError> {
        let (story, current) = self.position()?;
        story.node(current)
    }

    pub fn frame(&self) -> Result<Frame<'_>, StoryError> {
        let Some(story) = &self.story else {
            return Ok(Frame::Loading);
        };
        let node = self.current_node()?;

        let outlet = if node.is_ending {
            Outlet::Ending(if node.is_winning_ending {
                Ending::Winning
            } else {
                Ending::Losing
            })
        } else if node.options.is_empty() {
            return Err(StoryError::DeadEnd(node.id.clone()));
        } else {
            Outlet::Choices(&node.options)
        };

        Ok(Frame::Scene(Scene {
            title: &story.title,
            node,
            outlet,
            image: &self.image,
        }))
    }

    /// Follow option `index` of the current node.
    ///
    /// On error the cursor does not move.
    pub fn select(&mut self, index: usize) -> Result<&StoryNode, StoryError> {
        let (story, current) = self.position()?;
        let node = story.node(current)?;

        if node.is_ending {
            return Err(StoryError::EndingHasNoChoices(current.clone()));
        }
        if node.options.is_empty() {
            return Err(StoryError::DeadEnd(current.clone()));
        }
        let option = node.options.get(index).ok_or_else(|| StoryError::NoSuchOption {
            node: current.clone(),
            index,
            available: node.options.len(),
        })?;
        let target = story.follow(current, option)?.id.clone();

        info!("Transition: {} -> {} via '{}'", current, target, option.text);
        self.move_to(target);
        self.current_node()
    }

    /// Return to the root node. A no-op before any story is loaded.
    pub fn restart(&mut self) {
        let Some(root) = self.story.as_ref().map(|s| s.root_node_id.clone()) else {
            debug!("Restart ignored: no story loaded");
            return;
        };
        info!("Restart: back to {root}");
        self.move_to(root);
    }

    /// Start an image request for the current scene.
    ///
    /// Returns `None` when a request for this visit is already in flight or
    /// an image is already shown.
    pub fn begin_visualize(&mut self) -> Result<Option<SceneRequest>, StoryError> {
        let node = self.current_node()?;
        if !matches!(self.image, ImageState::Idle) {
            debug!("Visualize ignored: image state is {:?}", self.image);
            return Ok(None);
        }

        let request = SceneRequest {
            token: RequestToken {
                node: node.id.clone(),
                visit: self.visit,
            },
            scene_description: node.content.clone(),
        };
        debug!("Image request issued: {}", request.token);
        self.image = ImageState::Loading(request.token.clone());
        Ok(Some(request))
    }

    /// Apply an image response if it still belongs to the current visit.
    pub fn finish_visualize<E: fmt::Display>(
        &mut self,
        token: &RequestToken,
        result: Result<String, E>,
    ) -> ImageUpdate {
        let current = matches!(&self.image, ImageState::Loading(t) if t == token);
        if !current {
            info!("Discarding stale image response for {token}");
            return ImageUpdate::Stale;
        }

        match result {
            Ok(url) => {
                debug!("Image ready for {token}: {url}");
                self.image = ImageState::Ready(url);
                ImageUpdate::Applied
            }
            Err(e) => {
                warn!("Image request {token} failed: {e}");
                self.image = ImageState::Idle;
                ImageUpdate::Failed(format!("Could not generate image: {e}"))
            }
        }
    }

    fn position(&self) -> Result<(&StoryDocument, &NodeId), StoryError> {
        match (&self.story, &self.current) {
            (Some(story), Some(current)) => Ok((story, current)),
            _ => Err(StoryError::NoStory),
        }
    }

    fn move_to(&mut self, id: NodeId) {
        self.current = Some(id);
        self.visit += 1;
        self.image = ImageState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::cave_scenario;

    fn scene_of(view: &StoryView) -> Scene<'_> {
        match view.frame().unwrap() {
            Frame::Scene(scene) => scene,
            Frame::Loading => panic!("expected a scene"),
        }
    }

    /// a -> b -> a cycle with a side exit to a winning ending.
    fn looping_story() -> StoryDocument {
        StoryDocument::new(
            "loop",
            "Corridor",
            "a",
            vec![
                StoryNode::passage(
                    "a",
                    "A door ahead.",
                    vec![StoryOption::new("Open it", "b"), StoryOption::new("Leave", "out")],
                ),
                StoryNode::passage(
                    "b",
                    "The same corridor again.",
                    vec![StoryOption::new("Walk on", "a"), StoryOption::new("Sit down", "out")],
                ),
                StoryNode::ending("out", "Fresh air.", true),
            ],
        )
    }

    #[test]
    fn test_no_story_renders_loading() {
        let mut view = StoryView::new();
        assert!(matches!(view.frame().unwrap(), Frame::Loading));
        assert!(matches!(view.select(0), Err(StoryError::NoStory)));
        assert!(matches!(view.begin_visualize(), Err(StoryError::NoStory)));
        view.restart();
        assert!(view.current_node_id().is_none());
    }

    #[test]
    fn test_initialize_renders_root() {
        let view = StoryView::with_story(cave_scenario());
        let scene = scene_of(&view);
        assert_eq!(scene.title, "The Cave");
        assert_eq!(scene.node.content, "You enter a cave.");
        let labels: Vec<&str> = scene.options().iter().map(|o| o.text.as_str()).collect();
        assert_eq!(labels, ["Go left", "Go right"]);
        assert_eq!(scene.ending(), None);
    }

    #[test]
    fn test_select_follows_each_option() {
        let story = cave_scenario();
        let root = story.root().unwrap().clone();
        for (i, option) in root.options.iter().enumerate() {
            let mut view = StoryView::with_story(story.clone());
            let reached = view.select(i).unwrap().id.clone();
            assert_eq!(Some(&reached), option.target.as_ref());
            assert_eq!(view.current_node_id(), option.target.as_ref());
        }
    }

    #[test]
    fn test_cave_walkthrough() {
        let mut view = StoryView::with_story(cave_scenario());

        view.select(0).unwrap();
        let scene = scene_of(&view);
        assert_eq!(scene.node.content, "You find treasure!");
        assert_eq!(scene.ending(), Some(Ending::Winning));
        assert!(scene.options().is_empty());

        view.restart();
        let scene = scene_of(&view);
        assert_eq!(scene.node.content, "You enter a cave.");
        assert_eq!(scene.options().len(), 2);
    }

    #[test]
    fn test_endings_accept_no_choices() {
        let mut view = StoryView::with_story(cave_scenario());
        view.select(1).unwrap();
        assert!(matches!(
            view.select(0),
            Err(StoryError::EndingHasNoChoices(id)) if id.as_str() == "n3"
        ));
        assert_eq!(view.current_node_id().unwrap().as_str(), "n3");
    }

    #[test]
    fn test_winning_and_losing_messages_differ() {
        assert_ne!(Ending::Winning.headline(), Ending::Losing.headline());
        assert_ne!(Ending::Winning.message(), Ending::Losing.message());

        let mut view = StoryView::with_story(cave_scenario());
        view.select(1).unwrap();
        assert_eq!(scene_of(&view).ending(), Some(Ending::Losing));
    }

    #[test]
    fn test_restart_is_idempotent() {
        let mut view = StoryView::with_story(looping_story());
        view.select(0).unwrap();
        view.select(1).unwrap();

        view.restart();
        let once = (view.current_node_id().cloned(), view.image().clone());
        view.restart();
        let twice = (view.current_node_id().cloned(), view.image().clone());
        assert_eq!(once, twice);
        assert_eq!(once.0.unwrap().as_str(), "a");
    }

    #[test]
    fn test_restart_clears_image_and_outstanding_request() {
        let mut view = StoryView::with_story(cave_scenario());
        let shown = view.begin_visualize().unwrap().unwrap();
        view.finish_visualize::<String>(&shown.token, Ok("https://img/cave.png".into()));
        assert!(matches!(view.image(), ImageState::Ready(_)));

        view.restart();
        assert_eq!(view.image(), &ImageState::Idle);

        let pending = view.begin_visualize().unwrap().unwrap();
        view.restart();
        assert_eq!(view.image(), &ImageState::Idle);
        assert_eq!(
            view.finish_visualize::<String>(&pending.token, Ok("https://img/late.png".into())),
            ImageUpdate::Stale
        );
        assert_eq!(view.image(), &ImageState::Idle);
    }

    #[test]
    fn test_cycles_render_identically() {
        let mut direct = StoryView::with_story(looping_story());
        direct.select(1).unwrap();

        let mut around = StoryView::with_story(looping_story());
        around.select(0).unwrap();
        around.select(0).unwrap();
        around.select(0).unwrap();
        around.select(1).unwrap();

        assert_eq!(scene_of(&direct).node, scene_of(&around).node);
    }

    #[test]
    fn test_out_of_range_option() {
        let mut view = StoryView::with_story(cave_scenario());
        assert!(matches!(
            view.select(5),
            Err(StoryError::NoSuchOption { index: 5, available: 2, .. })
        ));
        assert_eq!(view.current_node_id().unwrap().as_str(), "n1");
    }

    #[test]
    fn test_dangling_target_is_an_error_and_keeps_cursor() {
        let story = StoryDocument::new(
            "s",
            "Broken",
            "a",
            vec![StoryNode::passage("a", "Start", vec![StoryOption::new("Jump", "void")])],
        );
        let mut view = StoryView::with_story(story);
        assert!(matches!(view.select(0), Err(StoryError::DanglingOption { .. })));
        assert_eq!(view.current_node_id().unwrap().as_str(), "a");
    }

    #[test]
    fn test_missing_root_is_reported() {
        let story = StoryDocument::new("s", "Empty", "ghost", vec![]);
        let view = StoryView::with_story(story);
        assert!(matches!(view.frame(), Err(StoryError::MissingNode(id)) if id.as_str() == "ghost"));
    }

    #[test]
    fn test_dead_end_is_a_data_error() {
        let story = StoryDocument::new(
            "s",
            "Stuck",
            "a",
            vec![StoryNode::passage("a", "Nothing happens.", vec![])],
        );
        let mut view = StoryView::with_story(story);
        assert!(matches!(view.frame(), Err(StoryError::DeadEnd(_))));
        assert!(matches!(view.select(0), Err(StoryError::DeadEnd(_))));
    }

    #[test]
    fn test_visualize_success() {
        let mut view = StoryView::with_story(cave_scenario());
        let request = view.begin_visualize().unwrap().unwrap();
        assert_eq!(request.scene_description, "You enter a cave.");
        assert!(matches!(view.image(), ImageState::Loading(_)));

        // A second press while loading does nothing.
        assert!(view.begin_visualize().unwrap().is_none());

        let update = view.finish_visualize::<String>(&request.token, Ok("https://img/cave.png".into()));
        assert_eq!(update, ImageUpdate::Applied);
        assert_eq!(view.image(), &ImageState::Ready("https://img/cave.png".into()));
    }

    #[test]
    fn test_visualize_failure_clears_loading() {
        let mut view = StoryView::with_story(cave_scenario());
        let request = view.begin_visualize().unwrap().unwrap();
        let update = view.finish_visualize(&request.token, Err("HTTP 500"));
        assert!(matches!(update, ImageUpdate::Failed(msg) if msg.contains("HTTP 500")));
        assert_eq!(view.image(), &ImageState::Idle);

        view.select(0).unwrap();
        assert_eq!(view.current_node_id().unwrap().as_str(), "n2");
    }

    #[test]
    fn test_image_cleared_on_select() {
        let mut view = StoryView::with_story(cave_scenario());
        let request = view.begin_visualize().unwrap().unwrap();
        view.finish_visualize::<String>(&request.token, Ok("https://img/a.png".into()));

        view.select(0).unwrap();
        assert_eq!(scene_of(&view).image, &ImageState::Idle);
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let mut view = StoryView::with_story(cave_scenario());
        let request = view.begin_visualize().unwrap().unwrap();
        view.select(0).unwrap();

        let update = view.finish_visualize::<String>(&request.token, Ok("https://img/cave.png".into()));
        assert_eq!(update, ImageUpdate::Stale);
        assert_eq!(view.image(), &ImageState::Idle);
    }

    #[test]
    fn test_stale_response_after_revisit_is_discarded() {
        let mut view = StoryView::with_story(looping_story());
        let first = view.begin_visualize().unwrap().unwrap();

        // a -> b -> a: same node, new visit.
        view.select(0).unwrap();
        view.select(0).unwrap();
        assert_eq!(view.current_node_id().unwrap().as_str(), "a");
        let second = view.begin_visualize().unwrap().unwrap();

        assert_eq!(
            view.finish_visualize::<String>(&first.token, Ok("old".into())),
            ImageUpdate::Stale
        );
        assert_eq!(
            view.finish_visualize::<String>(&second.token, Ok("new".into())),
            ImageUpdate::Applied
        );
        assert_eq!(view.image(), &ImageState::Ready("new".into()));
    }

    #[test]
    fn test_loading_new_story_resets_cursor_and_image() {
        let mut view = StoryView::with_story(cave_scenario());
        view.select(0).unwrap();
        view.begin_visualize().unwrap();

        view.load(looping_story());
        assert_eq!(view.current_node_id().unwrap().as_str(), "a");
        assert_eq!(view.image(), &ImageState::Idle);
    }
}
